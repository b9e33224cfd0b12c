pub mod support;

mod integration_tests;
