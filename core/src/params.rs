//! Keyword parameter splitting.
//!
//! The surrounding test runner hands parameters over as bare strings.
//! `name:value` tokens are field values,
//! `name=value` tokens are transport configuration,
//! and the special form `header:<name>:<value>` overrides a header field.
//! A token carrying both separators belongs to whichever comes first.

use std::collections::HashMap;

use snafu::{ensure, Snafu};

#[derive(Debug, Clone, Eq, PartialEq, Snafu)]
pub enum Error {
    #[snafu(display("illegal parameter `{}`", parameter))]
    IllegalParameter { parameter: String },

    #[snafu(display("non-ASCII key in parameter `{}`", parameter))]
    NonAsciiKey { parameter: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Keyword parameters split into their three dictionaries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parameters {
    /// Transport configuration entries (`name=value`).
    pub configs: HashMap<String, String>,
    /// Field value overrides (`name:value`), in the order given.
    pub fields: Vec<(String, String)>,
    /// Header overrides (`header:<name>:<value>`), in the order given.
    pub headers: Vec<(String, String)>,
}

/// Split raw keyword parameters.
pub fn parse_parameters<'a>(parameters: impl IntoIterator<Item = &'a str>) -> Result<Parameters> {
    let mut result = Parameters::default();
    for parameter in parameters {
        parse_entry(parameter, &mut result)?;
    }
    Ok(result)
}

fn parse_entry(parameter: &str, result: &mut Parameters) -> Result<()> {
    let colon = parameter.find(':');
    let equals = parameter.find('=');
    match (colon, equals) {
        (None, None) => IllegalParameterSnafu { parameter }.fail(),
        (Some(_), None) => field_entry(parameter, result),
        (None, Some(_)) => config_entry(parameter, result),
        (Some(colon), Some(equals)) if colon < equals => field_entry(parameter, result),
        (Some(_), Some(_)) => config_entry(parameter, result),
    }
}

fn field_entry(parameter: &str, result: &mut Parameters) -> Result<()> {
    let (name, value) = split(parameter, ':')?;
    if name == "header" {
        if let Some((header_name, header_value)) = value.split_once(':') {
            result
                .headers
                .push((header_name.trim().to_string(), header_value.trim().to_string()));
            return Ok(());
        }
    }
    result.fields.push((name, value));
    Ok(())
}

fn config_entry(parameter: &str, result: &mut Parameters) -> Result<()> {
    let (name, value) = split(parameter, '=')?;
    result.configs.insert(name, value);
    Ok(())
}

fn split(parameter: &str, separator: char) -> Result<(String, String)> {
    let (name, value) = match parameter.split_once(separator) {
        Some(parts) => parts,
        None => return IllegalParameterSnafu { parameter }.fail(),
    };
    let name = name.trim();
    ensure!(name.is_ascii(), NonAsciiKeySnafu { parameter });
    Ok((name.to_string(), value.trim().to_string()))
}
