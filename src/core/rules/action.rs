//! Rule actions, rule-type classification and target strings

use super::options::{RejectType, RuleOptions};
use crate::core::error::{Error, Result};

/// First word of every rule line
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Action {
    #[default]
    Accept,
    Drop,
    Reject,
    Log,
    Portfw,
    Redirect,
    Snat,
    Masq,
    Queue,
    Chain,
    Dnat,
    Bounce,
    #[strum(serialize = "nfqueue")]
    NFQueue,
    #[strum(serialize = "nflog")]
    NFLog,
    Protect,
    Separator,
}

impl Action {
    /// Actions whose `to` operand must be a single host
    pub const fn needs_host_target(self) -> bool {
        matches!(self, Action::Portfw | Action::Dnat | Action::Bounce)
    }
}

/// Where in the packet path a rule lands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum RuleType {
    Input,
    Output,
    Forward,
    Masq,
    Snat,
    Portfw,
    Redirect,
    Dnat,
    Bounce,
    Protect,
}

/// Classifies a traffic rule from its action and whether either end is the
/// firewall itself.
pub fn rule_type(action: Action, from_firewall: bool, to_firewall: bool) -> RuleType {
    match action {
        Action::Masq => RuleType::Masq,
        Action::Snat => RuleType::Snat,
        Action::Portfw => RuleType::Portfw,
        Action::Redirect => RuleType::Redirect,
        Action::Dnat => RuleType::Dnat,
        Action::Bounce => RuleType::Bounce,
        Action::Protect => RuleType::Protect,
        _ if from_firewall => RuleType::Output,
        _ if to_firewall => RuleType::Input,
        _ => RuleType::Forward,
    }
}

/// Target name for `action`, honouring the options that modify it.
///
/// A Log action clears `rule_log`, since logging is what the action does.
///
/// # Errors
///
/// - Chain without a `chain` option
/// - Separator, which never produces a target
pub fn determine_action(action: Action, options: &mut RuleOptions) -> Result<String> {
    let target = match action {
        Action::Accept => "ACCEPT".to_string(),
        Action::Drop | Action::Protect => "DROP".to_string(),
        Action::Reject => match options.reject_type {
            Some(RejectType::TcpReset) => "TCPRESET".to_string(),
            Some(reject) => format!("REJECT --reject-with {reject}"),
            None => "REJECT".to_string(),
        },
        Action::Log => {
            options.rule_log = false;
            "LOG".to_string()
        }
        Action::Portfw | Action::Dnat | Action::Bounce => "DNAT".to_string(),
        Action::Redirect => "REDIRECT".to_string(),
        Action::Snat => "SNAT".to_string(),
        Action::Masq => "MASQUERADE".to_string(),
        Action::Queue => "NEWQUEUE".to_string(),
        Action::NFQueue => "NFQUEUE".to_string(),
        Action::NFLog => "NFLOG".to_string(),
        Action::Chain => match options.chain.as_deref() {
            Some(chain) if !chain.is_empty() => chain.to_string(),
            _ => {
                return Err(Error::validation(
                    "chain",
                    "action 'chain' requires the 'chain' option",
                ));
            }
        },
        Action::Separator => {
            return Err(Error::Parameter("separators have no target".into()));
        }
    };
    Ok(target)
}
