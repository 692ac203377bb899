//! Parser for makemkvcon's `--robot` line protocol.
//!
//! makemkvcon in robot mode emits one message per line, shaped
//! `TYPE:id,field,field,...` with fields quoted and comma-separated (quotes
//! and backslash-escapes are stripped here, not interpreted further). This
//! mirrors the message set documented in makemkvcon's own `apdefs.h`:
//! `MSG`, `PRGC`/`PRGT`/`PRGV`, `DRV`, `TCOUNT`, `CINFO`/`TINFO`/`SINFO`.

#[derive(Debug)]
pub struct Cinfo {
    pub id: String,
    pub code: String,
    pub value: String,
}

#[derive(Debug)]
pub struct Tinfo {
    pub id: String,
    pub code: String,
    pub value: String,
}

#[derive(Debug)]
pub struct Sinfo {
    pub title_id: String,
    pub stream_id: String,
    pub code: String,
    pub value: String,
}

#[derive(Debug)]
pub struct Tcount {
    pub title_count: String,
}

#[derive(Debug)]
pub struct Drv {
    pub index: String,
    pub visible: String,
    pub enabled: String,
    pub flags: String,
    pub drive_name: String,
    pub disc_name: String,
}

#[derive(Debug)]
pub struct Prgv {
    pub current: u64,
    pub total: u64,
    pub max: u64,
}

#[derive(Debug)]
pub struct Prgt {
    pub code: String,
    pub name: String,
}

#[derive(Debug)]
pub struct Prgc {
    pub code: String,
    pub name: String,
}

#[derive(Debug)]
pub struct Msg {
    pub code: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ParseError {
    pub type_: String,
    pub fields: Vec<String>,
}

#[derive(Debug)]
pub enum MkvMessage {
    Cinfo(Cinfo),
    Tinfo(Tinfo),
    Sinfo(Sinfo),
    Tcount(Tcount),
    Drv(Drv),
    Prgv(Prgv),
    Prgt(Prgt),
    Prgc(Prgc),
    Msg(Msg),
    Unrecognized(ParseError),
}

/// Message code 5003 is makemkvcon's "operation failed" summary.
pub const MSG_CODE_OPERATION_FAILED: &str = "5003";

fn define_type(type_str: &str, mut fields: Vec<String>) -> MkvMessage {
    match type_str {
        "CINFO" if fields.len() >= 3 => MkvMessage::Cinfo(Cinfo {
            id: fields.remove(0),
            code: fields.remove(0),
            value: fields.join(","),
        }),
        "TINFO" if fields.len() >= 3 => MkvMessage::Tinfo(Tinfo {
            id: fields.remove(0),
            code: fields.remove(0),
            value: fields.join(","),
        }),
        "SINFO" if fields.len() >= 4 => MkvMessage::Sinfo(Sinfo {
            title_id: fields.remove(0),
            stream_id: fields.remove(0),
            code: fields.remove(0),
            value: fields.join(","),
        }),
        "TCOUNT" if !fields.is_empty() => MkvMessage::Tcount(Tcount {
            title_count: fields.remove(0),
        }),
        "DRV" if fields.len() >= 6 => MkvMessage::Drv(Drv {
            index: fields.remove(0),
            visible: fields.remove(0),
            enabled: {
                // field 2 ("unknown") is ignored, matches makemkv's own layout
                fields.remove(0);
                fields.remove(0)
            },
            flags: fields.remove(0),
            drive_name: fields.remove(0),
            disc_name: fields.join(","),
        }),
        "PRGV" if fields.len() >= 3 => {
            let current = fields[0].parse().unwrap_or(0);
            let total = fields[1].parse().unwrap_or(0);
            let max = fields[2].parse().unwrap_or(1).max(1);
            MkvMessage::Prgv(Prgv { current, total, max })
        }
        "PRGT" if fields.len() >= 2 => MkvMessage::Prgt(Prgt {
            code: fields.remove(0),
            name: fields.join(","),
        }),
        "PRGC" if fields.len() >= 2 => MkvMessage::Prgc(Prgc {
            code: fields.remove(0),
            name: fields.join(","),
        }),
        "MSG" if fields.len() >= 4 => MkvMessage::Msg(Msg {
            code: fields.remove(0),
            message: {
                // flags, mcount skipped; message text is field index 2
                fields.remove(0);
                fields.remove(0)
            },
        }),
        _ => MkvMessage::Unrecognized(ParseError {
            type_: type_str.to_string(),
            fields,
        }),
    }
}

pub fn parse_line(line: &str) -> Option<MkvMessage> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut parts: Vec<String> = trimmed
        .split(',')
        .map(|s| s.trim_matches(|c| c == '"' || c == '\\').to_string())
        .collect();

    let head = parts.remove(0);
    let mut head_split = head.splitn(2, ':');
    let type_str = head_split.next().unwrap_or("").to_string();
    let id_part = head_split.next().unwrap_or("").to_string();

    let mut fields = Vec::with_capacity(parts.len() + 1);
    fields.push(id_part);
    fields.extend(parts);

    Some(define_type(&type_str, fields))
}

pub fn parse_output(stdout: &str) -> Vec<MkvMessage> {
    stdout.lines().filter_map(parse_line).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_prgv_line() {
        let msgs = parse_output("PRGV:1000,5000,65536");
        assert_eq!(msgs.len(), 1);
        match &msgs[0] {
            MkvMessage::Prgv(p) => {
                assert_eq!(p.current, 1000);
                assert_eq!(p.total, 5000);
                assert_eq!(p.max, 65536);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn parses_tinfo_line_with_quoted_value() {
        let msgs = parse_output(r#"TINFO:0,2,0,"Movie Title""#);
        match &msgs[0] {
            MkvMessage::Tinfo(t) => {
                assert_eq!(t.id, "0");
                assert_eq!(t.code, "2");
                assert_eq!(t.value, "0,Movie Title");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn unrecognized_type_falls_back_to_error_variant() {
        let msgs = parse_output("GARBAGE:1,2,3");
        match &msgs[0] {
            MkvMessage::Unrecognized(e) => assert_eq!(e.type_, "GARBAGE"),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn ignores_blank_lines() {
        assert!(parse_output("\n\n").is_empty());
    }
}
