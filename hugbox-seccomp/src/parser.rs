//! Rule-file parser
//!
//! Line oriented, single pass:
//!
//! ```text
//! # comment
//! MY_FLAG=0x40 | O_CLOEXEC
//! read: 1
//! socket: arg0 == AF_UNIX || arg0 == AF_INET
//! prctl: arg0 == PR_SET_NAME || arg0 == PR_GET_NAME
//! ```
//!
//! A constant must be declared on an earlier line than any line that uses it.

use hugbox_common::MAX_ARGS;

use crate::constants::ConstantTable;
use crate::error::{Result, SeccompError};

/// Equality test on one syscall argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Condition {
    /// Argument index (0-5)
    pub arg: u8,
    /// Required value
    pub value: u64,
}

/// A parsed, not yet architecture-bound rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRule {
    /// 1-based source line
    pub line: usize,
    /// Syscall name as written
    pub syscall: String,
    /// Empty for an unconditional rule
    pub conditions: Vec<Condition>,
}

impl ParsedRule {
    pub fn is_unconditional(&self) -> bool {
        self.conditions.is_empty()
    }
}

/// Rules of one profile, in file order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    pub rules: Vec<ParsedRule>,
}

impl RuleSet {
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Parse rule-file text, reading and extending `constants` as it goes.
pub fn parse(text: &str, constants: &mut ConstantTable) -> Result<RuleSet> {
    let mut rules = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some((name, cond)) = line.split_once(':') {
            rules.push(parse_rule(line_no, line, name, cond, constants)?);
        } else if line.contains('=') {
            parse_declaration(line_no, line, constants)?;
        } else {
            return Err(SeccompError::syntax(line_no, line, "syntax error in profile"));
        }
    }

    Ok(RuleSet { rules })
}

fn parse_declaration(line_no: usize, line: &str, constants: &mut ConstantTable) -> Result<()> {
    let parts: Vec<&str> = line.split('=').collect();
    if parts.len() != 2 {
        return Err(SeccompError::syntax(line_no, line, "invalid constant"));
    }

    let name = parts[0].trim();
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(SeccompError::syntax(line_no, line, "invalid constant name"));
    }

    let value = eval_value(line_no, line, parts[1], constants)?;
    constants.declare(name, value);
    Ok(())
}

fn parse_rule(
    line_no: usize,
    line: &str,
    name: &str,
    cond: &str,
    constants: &ConstantTable,
) -> Result<ParsedRule> {
    let syscall = name.trim();
    if syscall.is_empty() || syscall.chars().any(char::is_whitespace) {
        return Err(SeccompError::syntax(line_no, line, "invalid rule"));
    }

    let cond = cond.trim();
    if cond.is_empty() {
        return Err(SeccompError::syntax(line_no, line, "invalid rule"));
    }

    let conditions = if cond == "1" {
        Vec::new()
    } else {
        cond.split("||")
            .map(|clause| parse_condition(line_no, line, clause, constants))
            .collect::<Result<Vec<_>>>()?
    };

    Ok(ParsedRule {
        line: line_no,
        syscall: syscall.to_string(),
        conditions,
    })
}

fn parse_condition(
    line_no: usize,
    line: &str,
    clause: &str,
    constants: &ConstantTable,
) -> Result<Condition> {
    let parts: Vec<&str> = clause.trim().split("==").collect();
    if parts.len() != 2 {
        return Err(SeccompError::syntax(line_no, line, "invalid condition"));
    }

    let arg = arg_index(parts[0].trim())
        .ok_or_else(|| SeccompError::syntax(line_no, line, "invalid argument"))?;

    let value = eval_value(line_no, line, parts[1], constants)?;
    Ok(Condition { arg, value })
}

/// `arg0` through `arg5`, spelled exactly.
fn arg_index(token: &str) -> Option<u8> {
    match token.strip_prefix("arg")?.as_bytes() {
        &[digit @ b'0'..=b'9'] if digit - b'0' < MAX_ARGS => Some(digit - b'0'),
        _ => None,
    }
}

/// Evaluate `TOKEN | TOKEN | ...`
fn eval_value(line_no: usize, line: &str, expr: &str, constants: &ConstantTable) -> Result<u64> {
    let mut value = 0u64;
    for token in expr.split('|') {
        let token = token.trim();
        if token.is_empty() {
            return Err(SeccompError::syntax(line_no, line, "invalid value"));
        }
        value |= constants.resolve_token(token).ok_or_else(|| {
            SeccompError::syntax(line_no, line, format!("invalid value '{}'", token))
        })?;
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_fresh(text: &str) -> Result<RuleSet> {
        parse(text, &mut ConstantTable::with_builtins())
    }

    fn syntax_line(err: SeccompError) -> usize {
        match err {
            SeccompError::Syntax { line, .. } => line,
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn skips_blank_lines_and_comments() {
        let rules = parse_fresh("\n# comment\n   \n  # indented comment\nread: 1\n").unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules.rules[0].syscall, "read");
        assert_eq!(rules.rules[0].line, 5);
        assert!(rules.rules[0].is_unconditional());
    }

    #[test]
    fn declaration_feeds_later_rule() {
        let mut table = ConstantTable::new();
        let rules = parse("MAGIC=0x2a\nioctl: arg1 == MAGIC\n", &mut table).unwrap();
        assert_eq!(table.get("MAGIC"), Some(42));
        assert_eq!(
            rules.rules[0].conditions,
            vec![Condition { arg: 1, value: 42 }]
        );
    }

    #[test]
    fn use_before_declaration_is_an_error() {
        let err = parse_fresh("ioctl: arg1 == MAGIC\nMAGIC=42\n").unwrap_err();
        assert_eq!(syntax_line(err), 1);
    }

    #[test]
    fn declarations_combine_with_bitwise_or() {
        let mut table = ConstantTable::with_builtins();
        parse("A=1\nB=A | 0x4\nC = B|8\n", &mut table).unwrap();
        assert_eq!(table.get("B"), Some(5));
        assert_eq!(table.get("C"), Some(13));
    }

    #[test]
    fn or_conditions_keep_order_and_indices() {
        let rules = parse_fresh(
            "socket: arg0 == AF_UNIX || arg0 == AF_INET || arg1 == SOCK_STREAM|SOCK_CLOEXEC\n",
        )
        .unwrap();
        let conds = &rules.rules[0].conditions;
        assert_eq!(conds.len(), 3);
        assert_eq!(conds[0], Condition { arg: 0, value: libc::AF_UNIX as u64 });
        assert_eq!(conds[1], Condition { arg: 0, value: libc::AF_INET as u64 });
        assert_eq!(
            conds[2],
            Condition {
                arg: 1,
                value: (libc::SOCK_STREAM | libc::SOCK_CLOEXEC) as u64
            }
        );
    }

    #[test]
    fn rejects_unclassifiable_line() {
        let err = parse_fresh("read: 1\nwhat is this\n").unwrap_err();
        match err {
            SeccompError::Syntax { line, text, .. } => {
                assert_eq!(line, 2);
                assert_eq!(text, "what is this");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_bad_declarations() {
        assert_eq!(syntax_line(parse_fresh("A=1=2\n").unwrap_err()), 1);
        assert_eq!(syntax_line(parse_fresh("=1\n").unwrap_err()), 1);
        assert_eq!(syntax_line(parse_fresh("A=\n").unwrap_err()), 1);
        assert_eq!(syntax_line(parse_fresh("A=1 |\n").unwrap_err()), 1);
    }

    #[test]
    fn rejects_bad_conditions() {
        for text in [
            "read:\n",
            ": 1\n",
            "read: arg0\n",
            "read: arg0 = 1\n",
            "read: arg6 == 1\n",
            "read: argx == 1\n",
            "read: arg0 == 1 == 2\n",
            "read: arg0 == 1 ||\n",
            "read: arg0 == NOPE\n",
            "read: arg+1 == 5\n",
            "read: arg00 == 5\n",
            "read: arg 1 == 5\n",
            "read: ARG1 == 5\n",
        ] {
            let err = parse_fresh(text).unwrap_err();
            assert_eq!(syntax_line(err), 1, "{text:?}");
        }
    }

    #[test]
    fn every_argument_index() {
        let rules = parse_fresh(
            "mmap: arg0 == 0 || arg1 == 1 || arg2 == 2 || arg3 == 3 || arg4 == 4 || arg5 == 5\n",
        )
        .unwrap();
        let args: Vec<u8> = rules.rules[0].conditions.iter().map(|c| c.arg).collect();
        assert_eq!(args, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn error_aborts_whole_profile() {
        let mut table = ConstantTable::new();
        let result = parse("read: 1\nwrite: 1\nbroken\nclose: 1\n", &mut table);
        assert!(result.is_err());
    }

    #[test]
    fn single_pipe_is_not_logical_or() {
        let rules = parse_fresh("A=1\nfcntl: arg1 == A | 2\n").unwrap();
        assert_eq!(rules.rules[0].conditions, vec![Condition { arg: 1, value: 3 }]);
    }
}
