//! Backtrace shapes as they arrive in reports, after symbolication.

use serde::{Deserialize, Serialize};

/// One stack frame.
///
/// `Source` frames point at project or library source. The other variants
/// are "special" frames whose location cannot be read as a literal
/// `file:line` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Source {
        file: String,
        #[serde(default)]
        line: Option<u32>,
        #[serde(default)]
        symbol: Option<String>,
    },
    /// Unsymbolicated machine address.
    Address { address: u64 },
    /// Deobfuscated JVM-style frame; line numbers may come through negative.
    Obfuscated {
        file: String,
        line: i64,
        #[serde(default)]
        symbol: Option<String>,
        #[serde(default)]
        class_name: Option<String>,
    },
    /// Frame inside minified JavaScript without a usable source map.
    Minified {
        url: String,
        #[serde(default)]
        line: Option<u32>,
        #[serde(default)]
        column: Option<u32>,
        #[serde(default)]
        symbol: Option<String>,
    },
    /// Any tag this core does not understand.
    #[serde(other)]
    Unrecognized,
}

impl Frame {
    /// Convenience constructor for a source frame with a known line.
    #[must_use]
    pub fn source(file: impl Into<String>, line: u32, symbol: impl Into<String>) -> Self {
        Self::Source {
            file: file.into(),
            line: Some(line),
            symbol: Some(symbol.into()),
        }
    }

    #[must_use]
    pub const fn is_special(&self) -> bool {
        !matches!(self, Self::Source { .. })
    }

    /// `(file, line)` for a source frame whose line is known.
    #[must_use]
    pub fn known_source_line(&self) -> Option<(&str, u32)> {
        match self {
            Self::Source {
                file,
                line: Some(line),
                ..
            } => Some((file.as_str(), *line)),
            _ => None,
        }
    }
}

/// Backtrace of one thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BacktraceThread {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub faulted: bool,
    #[serde(default)]
    pub frames: Vec<Frame>,
}

impl BacktraceThread {
    #[must_use]
    pub fn faulted(frames: Vec<Frame>) -> Self {
        Self {
            name: "main".to_owned(),
            faulted: true,
            frames,
        }
    }
}

/// The thread the exception was raised on: the first one flagged
/// `faulted`, else the first one reported.
#[must_use]
pub fn faulted_thread(threads: &[BacktraceThread]) -> Option<&BacktraceThread> {
    threads
        .iter()
        .find(|thread| thread.faulted)
        .or_else(|| threads.first())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_deserialize_by_tag() {
        let json = r#"[
            {"type": "source", "file": "lib/a.rb", "line": 5, "symbol": "run"},
            {"type": "address", "address": 4096},
            {"type": "obfuscated", "file": "Foo.java", "line": -15},
            {"type": "minified", "url": "https://cdn/app.min.js", "line": 1, "column": 400},
            {"type": "assembly", "offset": 12}
        ]"#;
        let frames: Vec<Frame> = serde_json::from_str(json).expect("frames should parse");
        assert_eq!(frames[0].known_source_line(), Some(("lib/a.rb", 5)));
        assert_eq!(frames[1], Frame::Address { address: 4096 });
        assert!(matches!(frames[2], Frame::Obfuscated { line: -15, .. }));
        assert!(matches!(frames[3], Frame::Minified { .. }));
        assert_eq!(frames[4], Frame::Unrecognized);
        assert!(frames[1..].iter().all(Frame::is_special));
    }

    #[test]
    fn test_faulted_thread_prefers_flag() {
        let idle = BacktraceThread {
            name: "idle".to_owned(),
            faulted: false,
            frames: vec![],
        };
        let crashed = BacktraceThread::faulted(vec![Frame::source("a.rb", 1, "x")]);
        let threads = vec![idle.clone(), crashed.clone()];
        assert_eq!(faulted_thread(&threads), Some(&crashed));
        assert_eq!(faulted_thread(&[idle.clone()]), Some(&idle));
        assert_eq!(faulted_thread(&[]), None);
    }

    #[test]
    fn test_source_without_line_is_not_known() {
        let frame = Frame::Source {
            file: "lib/a.rb".to_owned(),
            line: None,
            symbol: None,
        };
        assert_eq!(frame.known_source_line(), None);
        assert!(!frame.is_special());
    }
}
