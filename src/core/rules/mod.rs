//! Rule engine
//!
//! A rule travels through these stages:
//!
//! 1. [`parse`]: one text line into a [`Rule`] (action, operands, options)
//! 2. [`options`]: the `options` tail into [`options::RuleOptions`]
//! 3. [`analyze`]: names resolved against the object store, per-action
//!    checks applied, producing an [`analyze::RuleCache`]
//! 4. [`assemble`]: a [`Rule`] back into its persisted line
//!
//! [`list::RuleSet`] keeps the numbered rule list.
//!
//! # Grammar
//!
//! ```text
//! [;]<action> service <service> from <from> to <to> [options <options>]
//! [;]protect [<who>] against <danger> [from <source>]
//! [;]separator [options <options>]
//! ```
//!
//! A leading `;` marks the rule inactive.

pub mod action;
pub mod analyze;
pub mod assemble;
pub mod list;
pub mod options;
pub mod parse;

pub use action::{Action, RuleType, determine_action};
pub use analyze::{Endpoint, Resolver, RuleCache, analyze_rule};
pub use assemble::assemble_rule;
pub use list::RuleSet;
pub use options::RuleOptions;
pub use parse::parse_line;

/// Operand value matching every object
pub const ANY: &str = "any";

/// One rule as written, before name resolution
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Rule {
    pub action: Action,
    pub active: bool,
    /// 1-based position in its list; not persisted
    pub number: u32,
    pub service: String,
    pub from: String,
    pub to: String,
    /// Protect rules: the protected zone or interface (may be empty)
    pub who: String,
    /// Protect rules: the danger guarded against
    pub danger: String,
    /// Protect rules: optional source address/network
    pub source: String,
    pub options: Option<RuleOptions>,
}

impl Rule {
    /// Traffic rule with the given operands
    pub fn new(action: Action, service: &str, from: &str, to: &str) -> Self {
        Self {
            action,
            active: true,
            service: service.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            ..Self::default()
        }
    }

    /// `true` if any operand or interface option names `object`.
    pub fn references(&self, object: &str) -> bool {
        [&self.service, &self.from, &self.to, &self.who]
            .into_iter()
            .any(|operand| operand == object)
            || self
                .options
                .as_ref()
                .is_some_and(|o| o.interface_names().any(|i| i == object))
    }

    /// Replaces every operand or interface option equal to `old` by `new`.
    ///
    /// Returns `true` if anything changed.
    pub fn rename_references(&mut self, old: &str, new: &str) -> bool {
        let mut changed = false;
        for operand in [
            &mut self.service,
            &mut self.from,
            &mut self.to,
            &mut self.who,
        ] {
            if operand.as_str() == old {
                *operand = new.to_string();
                changed = true;
            }
        }
        if let Some(options) = self.options.as_mut() {
            for slot in [
                &mut options.in_int,
                &mut options.out_int,
                &mut options.via_int,
            ] {
                if slot.as_deref() == Some(old) {
                    *slot = Some(new.to_string());
                    changed = true;
                }
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_references_and_rename() {
        let mut rule = parse_line(r#"accept service ssh from lan to firewall options in_int="lan""#)
            .unwrap();
        assert!(rule.references("ssh"));
        assert!(rule.references("lan"));
        assert!(!rule.references("dmz"));

        assert!(rule.rename_references("lan", "office"));
        assert_eq!(rule.from, "office");
        assert_eq!(
            rule.options.as_ref().and_then(|o| o.in_int.as_deref()),
            Some("office")
        );
        assert!(!rule.rename_references("lan", "x"));
    }
}
