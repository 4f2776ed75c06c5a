mod common;
mod gateway_tests;
