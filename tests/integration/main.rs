// Integration tests don't need module declarations like unit tests;
// this file only gathers the modules of the `integration` test crate.

mod adapter_flow_test;
mod connection_test;
