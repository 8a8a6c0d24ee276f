//! Signal subscription rules (`AddMatch` / `RemoveMatch`).
//!
//! A rule is a comma-separated list of `key='value'` pairs. Every key that is
//! present must match; an empty rule matches everything.

use std::str::FromStr;

use imbus_types::{Body, Message};

use crate::error::BusError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Signal,
    MethodCall,
    MethodReturn,
    Error,
}

impl MessageType {
    fn of(msg: &Message) -> Self {
        match msg.body {
            Body::Call(_) => Self::MethodCall,
            Body::Return(_) => Self::MethodReturn,
            Body::Error(_) => Self::Error,
            Body::Signal(_) => Self::Signal,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchRule {
    pub msg_type: Option<MessageType>,
    pub sender: Option<String>,
    pub interface: Option<String>,
    pub member: Option<String>,
    pub path: Option<String>,
    pub arg0: Option<String>,
}

impl MatchRule {
    pub fn matches(&self, msg: &Message) -> bool {
        if self.msg_type.is_some_and(|t| t != MessageType::of(msg)) {
            return false;
        }
        if let Some(sender) = &self.sender {
            if msg.sender.as_deref() != Some(sender.as_str()) {
                return false;
            }
        }
        let (path, interface, member, arg0) = match &msg.body {
            Body::Signal(s) => (
                Some(s.path.as_str()),
                Some(s.kind.interface()),
                Some(s.kind.member()),
                s.kind.arg0(),
            ),
            Body::Call(c) => (Some(c.path.as_str()), Some(c.method.interface()), None, None),
            Body::Return(_) | Body::Error(_) => (None, None, None, None),
        };
        field_matches(self.path.as_deref(), path)
            && field_matches(self.interface.as_deref(), interface)
            && field_matches(self.member.as_deref(), member)
            && field_matches(self.arg0.as_deref(), arg0)
    }
}

fn field_matches(wanted: Option<&str>, actual: Option<&str>) -> bool {
    match wanted {
        None => true,
        Some(w) => actual == Some(w),
    }
}

fn malformed(rule: &str, what: &str) -> BusError {
    BusError::ProtocolViolation(format!("malformed match rule {rule:?}: {what}"))
}

/// Split `rule` into `(key, value)` pairs, honouring single quotes.
fn split_pairs(rule: &str) -> Result<Vec<(String, String)>, BusError> {
    let mut pairs = Vec::new();
    let mut chars = rule.chars().peekable();
    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }
        let mut key = String::new();
        loop {
            match chars.next() {
                Some('=') => break,
                Some(',') | None => return Err(malformed(rule, "expected '='")),
                Some(c) => key.push(c),
            }
        }
        let key = key.trim().to_string();
        if key.is_empty() {
            return Err(malformed(rule, "empty key"));
        }

        let mut value = String::new();
        if chars.peek() == Some(&'\'') {
            chars.next();
            loop {
                match chars.next() {
                    Some('\'') => break,
                    Some(c) => value.push(c),
                    None => return Err(malformed(rule, "unterminated quote")),
                }
            }
            while chars.peek().is_some_and(|c| c.is_whitespace()) {
                chars.next();
            }
            match chars.next() {
                Some(',') | None => {}
                Some(_) => return Err(malformed(rule, "expected ','")),
            }
        } else {
            for c in chars.by_ref() {
                if c == ',' {
                    break;
                }
                value.push(c);
            }
            value = value.trim().to_string();
        }
        pairs.push((key, value));
    }
    Ok(pairs)
}

impl FromStr for MatchRule {
    type Err = BusError;

    fn from_str(rule: &str) -> Result<Self, Self::Err> {
        let mut parsed = Self::default();
        for (key, value) in split_pairs(rule)? {
            let slot = match key.as_str() {
                "type" => {
                    if parsed.msg_type.is_some() {
                        return Err(malformed(rule, "duplicate key type"));
                    }
                    parsed.msg_type = Some(match value.as_str() {
                        "signal" => MessageType::Signal,
                        "method_call" => MessageType::MethodCall,
                        "method_return" => MessageType::MethodReturn,
                        "error" => MessageType::Error,
                        _ => return Err(malformed(rule, "unknown message type")),
                    });
                    continue;
                }
                "sender" => &mut parsed.sender,
                "interface" => &mut parsed.interface,
                "member" => &mut parsed.member,
                "path" => &mut parsed.path,
                "arg0" => &mut parsed.arg0,
                other => return Err(malformed(rule, &format!("unknown key {other}"))),
            };
            if slot.is_some() {
                return Err(malformed(rule, &format!("duplicate key {key}")));
            }
            *slot = Some(value);
        }
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imbus_types::{BusSignal, ConfigSignal, SignalKind, Value};

    fn owner_changed(name: &str) -> Message {
        let mut msg = Message::signal(
            imbus_types::BUS_PATH,
            SignalKind::Bus(BusSignal::NameOwnerChanged {
                name: name.into(),
                old_owner: String::new(),
                new_owner: ":1.4".into(),
            }),
        );
        msg.sender = Some(imbus_types::BUS_NAME.into());
        msg
    }

    #[test]
    fn parses_quoted_pairs() {
        let rule: MatchRule =
            "type='signal',interface='org.imbus.Bus',member='NameOwnerChanged',arg0='org.a.B'"
                .parse()
                .unwrap();
        assert_eq!(rule.msg_type, Some(MessageType::Signal));
        assert_eq!(rule.member.as_deref(), Some("NameOwnerChanged"));
        assert_eq!(rule.arg0.as_deref(), Some("org.a.B"));
        assert!(rule.path.is_none());
    }

    #[test]
    fn quoted_values_may_contain_commas() {
        let rule: MatchRule = "arg0='a,b', path='/x'".parse().unwrap();
        assert_eq!(rule.arg0.as_deref(), Some("a,b"));
        assert_eq!(rule.path.as_deref(), Some("/x"));
    }

    #[test]
    fn malformed_rules_are_violations() {
        for bad in [
            "type",
            "colour='red'",
            "member='A',member='B'",
            "path='/unterminated",
            "type='carrier-pigeon'",
            "sender='a' junk",
        ] {
            assert!(
                matches!(bad.parse::<MatchRule>(), Err(BusError::ProtocolViolation(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn empty_rule_matches_everything() {
        let rule: MatchRule = "".parse().unwrap();
        assert!(rule.matches(&owner_changed("org.a.B")));
    }

    #[test]
    fn arg0_and_member_filter_signals() {
        let rule: MatchRule = "member='NameOwnerChanged',arg0='org.a.B'".parse().unwrap();
        assert!(rule.matches(&owner_changed("org.a.B")));
        assert!(!rule.matches(&owner_changed("org.a.C")));

        let config = Message::signal(
            "/org/example/Config",
            SignalKind::Config(ConfigSignal::ValueChanged {
                section: "general".into(),
                name: "trigger".into(),
                value: Value::Str("Control+space".into()),
            }),
        );
        assert!(!rule.matches(&config));
        let by_section: MatchRule = "interface='org.imbus.Config',arg0='general'".parse().unwrap();
        assert!(by_section.matches(&config));
    }

    #[test]
    fn sender_must_match_exactly() {
        let rule: MatchRule = "sender='org.imbus.Bus'".parse().unwrap();
        assert!(rule.matches(&owner_changed("org.a.B")));
        let rule: MatchRule = "sender=':1.9'".parse().unwrap();
        assert!(!rule.matches(&owner_changed("org.a.B")));
    }
}
