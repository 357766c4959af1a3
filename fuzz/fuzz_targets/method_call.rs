//! Fuzz target for method-call construction.
//!
//! Arbitrary addresses and arguments must either be rejected with an error
//! or serialize into a message, never panic.

#![no_main]

use addbus::rpc::MethodCall;
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    destination: String,
    path: String,
    interface: String,
    method: String,
    args: Vec<String>,
}

fuzz_target!(|input: Input| {
    let Ok(mut call) = MethodCall::new(
        &input.destination,
        &input.path,
        &input.interface,
        &input.method,
    ) else {
        return;
    };

    for arg in input.args {
        if call.append_arg(arg).is_err() {
            return;
        }
    }

    let _ = call.into_message();
});
