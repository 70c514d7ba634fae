use crate::charclass::{all_of_class, is_class, is_domain_literal, is_token, CharClass};
use crate::{MailHeaderError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// dot-atom-text, additionally permitting RFC 6532 UTF-8 characters
fn is_utf8_dot_atom(s: &str) -> bool {
    !s.is_empty()
        && s.split('.').all(|label| {
            !label.is_empty()
                && label
                    .bytes()
                    .all(|b| b >= 0x80 || is_class(b, CharClass::ATOM))
        })
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddrSpec {
    pub local_part: String,
    pub domain: String,
}

impl AddrSpec {
    pub fn new(local_part: &str, domain: &str) -> Result<Self> {
        if local_part.is_empty() {
            return Err(MailHeaderError::format("empty local part"));
        }
        if local_part
            .bytes()
            .any(|b| is_class(b, CharClass::CONTROL) && b != b'\t')
        {
            return Err(MailHeaderError::format(format!(
                "local part {local_part:?} contains control characters"
            )));
        }
        if !is_utf8_dot_atom(domain) && !is_domain_literal(domain) {
            return Err(MailHeaderError::format(format!(
                "domain {domain:?} is neither a dot-atom nor a domain literal"
            )));
        }
        Ok(Self {
            local_part: local_part.to_string(),
            domain: domain.to_string(),
        })
    }

    /// The address as it appears on the wire, quoting the local part
    /// when it is not a dot-atom
    pub fn to_wire(&self) -> String {
        let mut result = String::with_capacity(self.local_part.len() + self.domain.len() + 3);
        if is_utf8_dot_atom(&self.local_part) {
            result.push_str(&self.local_part);
        } else {
            result.push('"');
            for c in self.local_part.chars() {
                if c == '"' || c == '\\' {
                    result.push('\\');
                }
                result.push(c);
            }
            result.push('"');
        }
        result.push('@');
        result.push_str(&self.domain);
        result
    }
}

impl fmt::Display for AddrSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mailbox {
    pub name: Option<String>,
    pub address: AddrSpec,
}

impl Mailbox {
    pub fn new(name: Option<&str>, address: AddrSpec) -> Self {
        Self {
            name: name.map(str::to_string),
            address,
        }
    }
}

/// An item from an Accept-Language style list
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QualityValue {
    pub value: String,
    pub quality: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

fn require_token(what: &str, value: &str) -> Result<()> {
    if is_token(value) {
        Ok(())
    } else {
        Err(MailHeaderError::format(format!(
            "{what} {value:?} is not a valid token"
        )))
    }
}

/// The value of an RFC 8098 Disposition field
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispositionAction {
    pub action_mode: String,
    pub sending_mode: String,
    pub disposition_type: String,
    pub modifiers: Vec<String>,
}

impl DispositionAction {
    pub fn new(
        action_mode: &str,
        sending_mode: &str,
        disposition_type: &str,
        modifiers: &[&str],
    ) -> Result<Self> {
        require_token("action mode", action_mode)?;
        require_token("sending mode", sending_mode)?;
        require_token("disposition type", disposition_type)?;
        for modifier in modifiers {
            require_token("disposition modifier", modifier)?;
        }
        Ok(Self {
            action_mode: action_mode.to_string(),
            sending_mode: sending_mode.to_string(),
            disposition_type: disposition_type.to_string(),
            modifiers: modifiers.iter().map(|m| m.to_string()).collect(),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Importance {
    Required,
    Optional,
}

impl FromStr for Importance {
    type Err = MailHeaderError;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("required") {
            Ok(Self::Required)
        } else if s.eq_ignore_ascii_case("optional") {
            Ok(Self::Optional)
        } else {
            Err(MailHeaderError::format(format!(
                "importance must be required or optional, found {s:?}"
            )))
        }
    }
}

impl fmt::Display for Importance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Required => f.write_str("required"),
            Self::Optional => f.write_str("optional"),
        }
    }
}

/// One entry of an RFC 8098 Disposition-Notification-Options field
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispositionNotificationParameter {
    pub name: String,
    pub importance: Importance,
    pub values: Vec<String>,
}

impl DispositionNotificationParameter {
    pub fn new(name: &str, importance: Importance, values: &[&str]) -> Result<Self> {
        require_token("parameter name", name)?;
        if values.is_empty() {
            return Err(MailHeaderError::format(format!(
                "parameter {name} requires at least one value"
            )));
        }
        for value in values {
            require_token("parameter value", value)?;
        }
        Ok(Self {
            name: name.to_string(),
            importance,
            values: values.iter().map(|v| v.to_string()).collect(),
        })
    }
}

/// A `type; text` pair such as an RFC 3464 diagnostic code
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationField {
    pub kind: String,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub value: String,
}

/// MIME parameters in their decoded form. Names compare
/// case-insensitively and each name appears at most once.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterList {
    parameters: Vec<Parameter>,
}

impl ParameterList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .map(|p| p.value.as_str())
    }

    /// Add or replace a parameter
    pub fn set(&mut self, name: &str, value: &str) -> Result<()> {
        if !all_of_class(name, CharClass::ATTRIBUTE) {
            return Err(MailHeaderError::format(format!(
                "parameter name {name:?} is not a valid attribute"
            )));
        }
        match self
            .parameters
            .iter_mut()
            .find(|p| p.name.eq_ignore_ascii_case(name))
        {
            Some(existing) => existing.value = value.to_string(),
            None => self.parameters.push(Parameter {
                name: name.to_string(),
                value: value.to_string(),
            }),
        }
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let idx = self
            .parameters
            .iter()
            .position(|p| p.name.eq_ignore_ascii_case(name))?;
        Some(self.parameters.remove(idx).value)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Parameter> {
        self.parameters.iter()
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }
}

impl<'a> IntoIterator for &'a ParameterList {
    type Item = &'a Parameter;
    type IntoIter = std::slice::Iter<'a, Parameter>;

    fn into_iter(self) -> Self::IntoIter {
        self.parameters.iter()
    }
}
