use super::options::assemble_options;
use super::{Action, Rule};
use std::fmt::Write;

/// Writes `rule` in its persisted form; [`super::parse_line`] reads it back.
///
/// The rule number is not part of the line.
pub fn assemble_rule(rule: &Rule) -> String {
    let mut line = String::new();
    if !rule.active {
        line.push(';');
    }
    line.push_str(rule.action.as_ref());

    match rule.action {
        Action::Separator => {}
        Action::Protect => {
            if !rule.who.is_empty() {
                let _ = write!(line, " {}", rule.who);
            }
            let _ = write!(line, " against {}", rule.danger);
            if !rule.source.is_empty() {
                let _ = write!(line, " from {}", rule.source);
            }
        }
        _ => {
            let _ = write!(
                line,
                " service {} from {} to {}",
                rule.service, rule.from, rule.to
            );
        }
    }

    if rule.action != Action::Protect
        && let Some(options) = rule.options.as_ref()
    {
        let text = assemble_options(options);
        if !text.is_empty() {
            line.push_str(" options ");
            line.push_str(&text);
        }
    }
    line
}
