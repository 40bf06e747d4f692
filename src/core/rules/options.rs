//! Rule options micro-language
//!
//! Options follow the `options` keyword as comma separated `key` or
//! `key="value"` tokens:
//!
//! ```text
//! log,logprefix="ssh-in",limit="3/min",burst="5",comment="admin \"only\""
//! ```
//!
//! Commas inside quotes don't split. A quote preceded by a backslash is part
//! of the value. Unknown keys are logged and ignored; malformed values of
//! known keys reject the whole line.

use crate::core::error::ParseError;
use crate::validators::{
    sanitize_comment, validate_log_prefix, validate_port, validate_port_range, validate_rate_limit,
};
use std::fmt;
use std::str::FromStr;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::EnumIter,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LimitUnit {
    Sec,
    Min,
    Hour,
    Day,
}

impl LimitUnit {
    pub const fn as_str(self) -> &'static str {
        match self {
            LimitUnit::Sec => "sec",
            LimitUnit::Min => "min",
            LimitUnit::Hour => "hour",
            LimitUnit::Day => "day",
        }
    }
}

/// `limit="N/unit"`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub count: u32,
    pub unit: LimitUnit,
}

impl fmt::Display for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.count, self.unit.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum BandwidthUnit {
    Kbit,
    Mbit,
    Kbps,
    Mbps,
}

/// Shaping value such as `in_max="100kbit"`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bandwidth {
    pub value: u32,
    pub unit: BandwidthUnit,
}

impl fmt::Display for Bandwidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.value, self.unit)
    }
}

impl FromStr for Bandwidth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
        let (digits, unit) = s.split_at(split);
        let value: u32 = digits
            .parse()
            .map_err(|_| format!("'{s}' does not start with a number"))?;
        if value == 0 {
            return Err("bandwidth must be positive".to_string());
        }
        let unit = unit
            .trim()
            .parse()
            .map_err(|_| format!("unknown unit in '{s}' (kbit, mbit, kbps, mbps)"))?;
        Ok(Self { value, unit })
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::EnumIter,
)]
#[strum(serialize_all = "kebab-case")]
pub enum RejectType {
    IcmpNetUnreachable,
    IcmpHostUnreachable,
    IcmpProtoUnreachable,
    IcmpPortUnreachable,
    IcmpNetProhibited,
    IcmpHostProhibited,
    IcmpAdmProhibited,
    TcpReset,
}

/// Inclusive port range inside `remoteport`/`listenport`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortSpan {
    pub low: u16,
    pub high: u16,
}

impl fmt::Display for PortSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.low == self.high {
            write!(f, "{}", self.low)
        } else {
            write!(f, "{}:{}", self.low, self.high)
        }
    }
}

/// Parsed options of one rule
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RuleOptions {
    pub rule_log: bool,
    pub loglimit: Option<u32>,
    pub logburst: Option<u32>,
    pub logprefix: Option<String>,
    pub limit: Option<RateLimit>,
    pub burst: Option<u32>,
    pub in_int: Option<String>,
    pub out_int: Option<String>,
    pub via_int: Option<String>,
    pub remoteport: Vec<PortSpan>,
    pub listenport: Vec<PortSpan>,
    pub redirectport: Option<u16>,
    pub nfmark: Option<u32>,
    pub chain: Option<String>,
    pub nfqueuenum: Option<u16>,
    pub nflognum: Option<u16>,
    pub prio: Option<u32>,
    pub in_max: Option<Bandwidth>,
    pub in_min: Option<Bandwidth>,
    pub out_max: Option<Bandwidth>,
    pub out_min: Option<Bandwidth>,
    pub random: bool,
    pub reject_type: Option<RejectType>,
    pub comment: Option<String>,
}

impl RuleOptions {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Interface names the options refer to, in `in`, `out`, `via` order
    pub fn interface_names(&self) -> impl Iterator<Item = &str> + '_ {
        [&self.in_int, &self.out_int, &self.via_int]
            .into_iter()
            .filter_map(|o| o.as_deref())
    }
}

/// Escapes every `"` not already preceded by a backslash.
///
/// # Examples
///
/// ```
/// use zonefw::core::rules::options::escape_quotes;
///
/// assert_eq!(escape_quotes(r#"say "hi""#), r#"say \"hi\""#);
/// assert_eq!(escape_quotes(r#"say \"hi\""#), r#"say \"hi\""#);
/// ```
pub fn escape_quotes(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 4);
    let mut prev = None;
    for c in value.chars() {
        if c == '"' && prev != Some('\\') {
            out.push('\\');
        }
        out.push(c);
        prev = Some(c);
    }
    out
}

/// Reverses [`escape_quotes`].
pub fn unescape_quotes(value: &str) -> String {
    value.replace("\\\"", "\"")
}

/// Splits on commas outside quotes.
///
/// # Errors
///
/// [`ParseError::UnbalancedQuotes`] if a quote is left open.
pub fn split_options(input: &str) -> Result<Vec<String>, ParseError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;

    for c in input.chars() {
        match c {
            '"' if !escaped => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            ',' if !in_quotes => {
                let token = current.trim();
                if !token.is_empty() {
                    tokens.push(token.to_string());
                }
                current.clear();
            }
            _ => current.push(c),
        }
        escaped = c == '\\' && !escaped;
    }

    if in_quotes {
        return Err(ParseError::UnbalancedQuotes(input.to_string()));
    }
    let token = current.trim();
    if !token.is_empty() {
        tokens.push(token.to_string());
    }
    Ok(tokens)
}

fn invalid(key: &str, reason: impl Into<String>) -> ParseError {
    ParseError::InvalidOption {
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn number<T: FromStr>(key: &str, value: &str) -> Result<T, ParseError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(key, format!("'{value}' is not a valid number")))
}

fn parse_spans(key: &str, value: &str) -> Result<Vec<PortSpan>, ParseError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|span| -> Result<PortSpan, ParseError> {
            let (low, high) = span.split_once(':').unwrap_or((span, span));
            let (low, high) = validate_port_range(number(key, low)?, number(key, high)?)
                .map_err(|e| invalid(key, e))?;
            Ok(PortSpan { low, high })
        })
        .collect()
}

fn parse_limit(value: &str) -> Result<RateLimit, ParseError> {
    let (count, unit) = value.split_once('/').unwrap_or((value, "sec"));
    let count: u32 = number("limit", count)?;
    let unit: LimitUnit = unit
        .trim()
        .parse()
        .map_err(|_| invalid("limit", format!("unknown unit '{unit}' (sec, min, hour, day)")))?;
    match validate_rate_limit(count, unit) {
        Ok(Some(warning)) => tracing::warn!("limit: {}", warning),
        Ok(None) => {}
        Err(e) => return Err(invalid("limit", e)),
    }
    Ok(RateLimit { count, unit })
}

fn text(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

/// Parses the text after the `options` keyword.
///
/// Non-fatal problems (unknown keys, an over-long log prefix) are logged and
/// the offending option dropped.
///
/// # Errors
///
/// [`ParseError::UnbalancedQuotes`] or [`ParseError::InvalidOption`].
pub fn parse_options(input: &str) -> Result<RuleOptions, ParseError> {
    let mut opt = RuleOptions::default();

    for token in split_options(input)? {
        let (key, value) = match token.split_once('=') {
            Some((k, v)) => {
                let v = v.trim();
                let v = v
                    .strip_prefix('"')
                    .and_then(|s| s.strip_suffix('"'))
                    .unwrap_or(v);
                (k.trim().to_ascii_lowercase(), Some(unescape_quotes(v)))
            }
            None => (token.trim().to_ascii_lowercase(), None),
        };
        let value_ref = value.as_deref();
        let required = || value_ref.ok_or_else(|| invalid(&key, "value required"));

        match key.as_str() {
            "log" => opt.rule_log = true,
            "loglimit" => opt.loglimit = Some(number(&key, required()?)?),
            "logburst" => opt.logburst = Some(number(&key, required()?)?),
            "logprefix" => match validate_log_prefix(required()?) {
                Ok(prefix) if !prefix.is_empty() => opt.logprefix = Some(prefix),
                Ok(_) => {}
                Err(e) => tracing::warn!("{}; logprefix disabled", e),
            },
            "limit" => opt.limit = Some(parse_limit(required()?)?),
            "burst" => opt.burst = Some(number(&key, required()?)?),
            "in_int" => opt.in_int = text(value_ref),
            "out_int" => opt.out_int = text(value_ref),
            "via_int" => opt.via_int = text(value_ref),
            "remoteport" => opt.remoteport = parse_spans(&key, required()?)?,
            "listenport" => opt.listenport = parse_spans(&key, required()?)?,
            "redirectport" => {
                let port = validate_port(number(&key, required()?)?).map_err(|e| invalid(&key, e))?;
                opt.redirectport = Some(port);
            }
            "nfmark" => opt.nfmark = Some(number(&key, required()?)?),
            "chain" => opt.chain = text(value_ref),
            "nfqueuenum" => opt.nfqueuenum = Some(number(&key, required()?)?),
            "nflognum" => opt.nflognum = Some(number(&key, required()?)?),
            "prio" => opt.prio = Some(number(&key, required()?)?),
            "in_max" | "in_min" | "out_max" | "out_min" => {
                let bandwidth: Bandwidth = required()?.parse().map_err(|e: String| invalid(&key, e))?;
                match key.as_str() {
                    "in_max" => opt.in_max = Some(bandwidth),
                    "in_min" => opt.in_min = Some(bandwidth),
                    "out_max" => opt.out_max = Some(bandwidth),
                    _ => opt.out_min = Some(bandwidth),
                }
            }
            "random" => opt.random = true,
            "rejecttype" => {
                let raw = required()?.trim();
                let reject = raw
                    .parse()
                    .map_err(|_| invalid(&key, format!("unknown reject type '{raw}'")))?;
                opt.reject_type = Some(reject);
            }
            "comment" => {
                let comment = sanitize_comment(value_ref.unwrap_or_default());
                opt.comment = (!comment.is_empty()).then_some(comment);
            }
            other => tracing::warn!("Ignoring unknown option '{}'", other),
        }
    }
    Ok(opt)
}

fn join_spans(spans: &[PortSpan]) -> String {
    spans
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Writes options back in a fixed key order; the inverse of [`parse_options`].
///
/// Free-text values have their quotes escaped.
pub fn assemble_options(opt: &RuleOptions) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut quoted = |key: &str, value: String| parts.push(format!("{key}=\"{value}\""));

    if let Some(v) = &opt.in_int {
        quoted("in_int", escape_quotes(v));
    }
    if let Some(v) = &opt.out_int {
        quoted("out_int", escape_quotes(v));
    }
    if let Some(v) = &opt.via_int {
        quoted("via_int", escape_quotes(v));
    }
    if !opt.remoteport.is_empty() {
        quoted("remoteport", join_spans(&opt.remoteport));
    }
    if !opt.listenport.is_empty() {
        quoted("listenport", join_spans(&opt.listenport));
    }
    if let Some(v) = opt.redirectport {
        quoted("redirectport", v.to_string());
    }
    if let Some(v) = opt.reject_type {
        quoted("rejecttype", v.to_string());
    }
    if let Some(v) = opt.nfmark {
        quoted("nfmark", v.to_string());
    }
    if let Some(v) = &opt.chain {
        quoted("chain", escape_quotes(v));
    }
    if let Some(v) = opt.nfqueuenum {
        quoted("nfqueuenum", v.to_string());
    }
    if let Some(v) = opt.nflognum {
        quoted("nflognum", v.to_string());
    }
    if let Some(v) = opt.limit {
        quoted("limit", v.to_string());
    }
    if let Some(v) = opt.burst {
        quoted("burst", v.to_string());
    }
    if let Some(v) = opt.prio {
        quoted("prio", v.to_string());
    }
    for (key, value) in [
        ("in_max", opt.in_max),
        ("in_min", opt.in_min),
        ("out_max", opt.out_max),
        ("out_min", opt.out_min),
    ] {
        if let Some(v) = value {
            quoted(key, v.to_string());
        }
    }
    if let Some(v) = opt.loglimit {
        quoted("loglimit", v.to_string());
    }
    if let Some(v) = opt.logburst {
        quoted("logburst", v.to_string());
    }
    if let Some(v) = &opt.logprefix {
        quoted("logprefix", escape_quotes(v));
    }
    if let Some(v) = &opt.comment {
        quoted("comment", escape_quotes(v));
    }
    if opt.rule_log {
        parts.push("log".to_string());
    }
    if opt.random {
        parts.push("random".to_string());
    }
    parts.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_respects_quotes() {
        let tokens = split_options(r#"log, comment="a, b",remoteport="80,443""#).unwrap();
        assert_eq!(tokens, ["log", r#"comment="a, b""#, r#"remoteport="80,443""#]);
    }

    #[test]
    fn test_split_unbalanced() {
        assert!(matches!(
            split_options(r#"comment="open"#),
            Err(ParseError::UnbalancedQuotes(_))
        ));
    }

    #[test]
    fn test_escaped_quote_does_not_toggle() {
        let tokens = split_options(r#"comment="say \"hi, there\"",log"#).unwrap();
        assert_eq!(tokens.len(), 2);
    }

    #[test]
    fn test_parse_common_options() {
        let opt = parse_options(
            r#"log,loglimit="5",logprefix="ssh",limit="3/min",burst="5",in_int="lan",random"#,
        )
        .unwrap();
        assert!(opt.rule_log);
        assert_eq!(opt.loglimit, Some(5));
        assert_eq!(opt.logprefix.as_deref(), Some("ssh"));
        assert_eq!(
            opt.limit,
            Some(RateLimit {
                count: 3,
                unit: LimitUnit::Min
            })
        );
        assert_eq!(opt.burst, Some(5));
        assert_eq!(opt.in_int.as_deref(), Some("lan"));
        assert!(opt.random);
    }

    #[test]
    fn test_port_lists_and_redirect() {
        let opt = parse_options(r#"remoteport="80,8000:8010",listenport="8080",redirectport="3128""#)
            .unwrap();
        assert_eq!(
            opt.remoteport,
            [
                PortSpan { low: 80, high: 80 },
                PortSpan {
                    low: 8000,
                    high: 8010
                }
            ]
        );
        assert_eq!(opt.listenport, [PortSpan { low: 8080, high: 8080 }]);
        assert_eq!(opt.redirectport, Some(3128));
        assert!(parse_options(r#"redirectport="0""#).is_err());
        assert!(parse_options(r#"redirectport="70000""#).is_err());
        assert!(parse_options(r#"remoteport="90:80""#).is_err());
    }

    #[test]
    fn test_long_logprefix_is_dropped() {
        let opt = parse_options(r#"log,logprefix="this-is-far-too-long""#).unwrap();
        assert!(opt.rule_log);
        assert_eq!(opt.logprefix, None);
    }

    #[test]
    fn test_unknown_key_ignored() {
        let opt = parse_options(r#"frobnicate="yes",log"#).unwrap();
        assert!(opt.rule_log);
    }

    #[test]
    fn test_bad_values_rejected() {
        assert!(parse_options(r#"limit="0/sec""#).is_err());
        assert!(parse_options(r#"limit="5/fortnight""#).is_err());
        assert!(parse_options(r#"in_max="fast""#).is_err());
        assert!(parse_options(r#"rejecttype="icmp-nope""#).is_err());
        assert!(parse_options("nfmark").is_err());
    }

    #[test]
    fn test_bandwidth_and_reject() {
        let opt = parse_options(r#"in_max="100kbit",out_min="2mbps",rejecttype="tcp-reset""#).unwrap();
        assert_eq!(
            opt.in_max,
            Some(Bandwidth {
                value: 100,
                unit: BandwidthUnit::Kbit
            })
        );
        assert_eq!(opt.out_min.map(|b| b.to_string()).as_deref(), Some("2mbps"));
        assert_eq!(opt.reject_type, Some(RejectType::TcpReset));
    }

    #[test]
    fn test_comment_quote_roundtrip() {
        let opt = RuleOptions {
            comment: Some(r#"the "main" box"#.to_string()),
            ..RuleOptions::default()
        };
        let text = assemble_options(&opt);
        assert_eq!(text, r#"comment="the \"main\" box""#);
        assert_eq!(parse_options(&text).unwrap(), opt);
    }

    #[test]
    fn test_text_values_escape_quotes() {
        let opt = parse_options(
            r#"chain="my\"chain",in_int="a\"b",out_int="c",via_int="\"d\"""#,
        )
        .unwrap();
        assert_eq!(opt.chain.as_deref(), Some(r#"my"chain"#));
        assert_eq!(opt.via_int.as_deref(), Some(r#""d""#));

        let text = assemble_options(&opt);
        assert!(text.contains(r#"chain="my\"chain""#), "{text}");
        assert_eq!(parse_options(&text).unwrap(), opt);
    }

    #[test]
    fn test_assemble_reparses_equal() {
        let opt = parse_options(
            r#"via_int="wan",listenport="80,8080",remoteport="8000:8010",nfqueuenum="3",prio="2",in_min="5mbit",log,logburst="4""#,
        )
        .unwrap();
        assert_eq!(parse_options(&assemble_options(&opt)).unwrap(), opt);
    }

    #[test]
    fn test_escape_is_idempotent() {
        let once = escape_quotes(r#"a "b""#);
        assert_eq!(escape_quotes(&once), once);
        assert_eq!(unescape_quotes(&once), r#"a "b""#);
    }
}
