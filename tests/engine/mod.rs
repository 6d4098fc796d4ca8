mod dispatch_tests;
mod helpers;
mod pipeline_tests;
