//! D-Bus interface definition for the adder service.

use thiserror::Error;
use tracing::debug;
use zbus::interface;

/// Why an `add_numbers` request was rejected.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AddError {
    #[error("expected two integers separated by whitespace, got {0} values")]
    WrongArity(usize),

    #[error("'{0}' is not an integer")]
    NotAnInteger(String),

    #[error("sum does not fit in 64 bits")]
    Overflow,
}

/// Parse two whitespace-separated integers and add them.
pub fn add_numbers(input: &str) -> Result<i64, AddError> {
    let parts: Vec<&str> = input.split_whitespace().collect();
    let [a, b] = parts.as_slice() else {
        return Err(AddError::WrongArity(parts.len()));
    };

    let parse = |s: &str| {
        s.parse::<i64>()
            .map_err(|_| AddError::NotAnInteger(s.to_string()))
    };
    parse(*a)?.checked_add(parse(*b)?).ok_or(AddError::Overflow)
}

/// D-Bus interface implementation for the adder.
///
/// Registered at `/org/addbus/Adder` with the interface name
/// `org.addbus.Adder1`.
#[derive(Debug, Default)]
pub struct AdderInterface;

#[interface(name = "org.addbus.Adder1")]
impl AdderInterface {
    /// Add the two integers in `input` and return the sum as text.
    #[zbus(name = "add_numbers")]
    async fn add_numbers(&self, input: String) -> zbus::fdo::Result<String> {
        debug!("add_numbers({:?})", input);
        add_numbers(&input)
            .map(|sum| sum.to_string())
            .map_err(|e| zbus::fdo::Error::InvalidArgs(e.to_string()))
    }
}
