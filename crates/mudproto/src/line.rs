use bytes::BytesMut;
use memchr::memchr;
use tokio::io::{AsyncRead, AsyncReadExt};
use zeroize::Zeroize;

use crate::event::Event;

pub const MAX_LINE_LEN: usize = 4 * 1024;

/// Splits an inbound byte stream into text lines.
#[derive(Debug)]
pub struct LineReader<R> {
    inner: R,
    buf: BytesMut,
    max_line_len: usize,
}

impl<R> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(MAX_LINE_LEN),
            max_line_len: MAX_LINE_LEN,
        }
    }

    pub fn max_line_len(mut self, max: usize) -> Self {
        self.max_line_len = max.max(1);
        self
    }
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    /// Next line without its `\n` / `\r\n`, invalid UTF-8 replaced. The raw
    /// bytes are wiped once decoded; the returned string is the only copy.
    ///
    /// `Ok(None)` on EOF; a trailing unterminated fragment is still returned.
    pub async fn read_line(&mut self) -> std::io::Result<Option<String>> {
        loop {
            if let Some(i) = memchr(b'\n', &self.buf) {
                let mut raw = self.buf.split_to(i + 1);
                return Ok(Some(take_line(&mut raw)));
            }
            if self.buf.len() > self.max_line_len {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "line too long",
                ));
            }
            if self.inner.read_buf(&mut self.buf).await? == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                let mut raw = self.buf.split();
                return Ok(Some(take_line(&mut raw)));
            }
        }
    }
}

fn take_line(raw: &mut [u8]) -> String {
    let mut end = raw.len();
    while end > 0 && matches!(raw[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    let line = String::from_utf8_lossy(&raw[..end]).into_owned();
    raw.zeroize();
    line
}

/// Plain-text form of an outbound event for line clients, CRLF-terminated.
/// Out-of-band events (GMCP) have none.
pub fn render(ev: &Event) -> Option<String> {
    match ev {
        Event::Text { data } | Event::Command { data } => {
            let mut s = String::with_capacity(data.len() + 2);
            for l in data.lines() {
                s.push_str(l);
                s.push_str("\r\n");
            }
            if data.is_empty() {
                s.push_str("\r\n");
            }
            Some(s)
        }
        Event::Gmcp { .. } => None,
        Event::Table {
            title,
            columns,
            rows,
        } => Some(render_table(title, columns, rows)),
    }
}

fn render_table(title: &str, columns: &[String], rows: &[Vec<String>]) -> String {
    let ncols = columns
        .len()
        .max(rows.iter().map(Vec::len).max().unwrap_or(0));
    let mut widths = vec![0usize; ncols];
    for row in std::iter::once(columns).chain(rows.iter().map(Vec::as_slice)) {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }
    let fmt_row = |row: &[String]| {
        let cells = (0..ncols)
            .map(|i| {
                let c = row.get(i).map(String::as_str).unwrap_or("");
                format!("{c:<w$}", w = widths[i])
            })
            .collect::<Vec<_>>();
        format!("{}\r\n", cells.join("  ").trim_end())
    };

    let mut out = String::new();
    if !title.is_empty() {
        out.push_str(title);
        out.push_str("\r\n");
    }
    if !columns.is_empty() {
        out.push_str(&fmt_row(columns));
        let rule = widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>();
        out.push_str(&rule.join("  "));
        out.push_str("\r\n");
    }
    for row in rows {
        out.push_str(&fmt_row(row));
    }
    out
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncWriteExt;

    use super::{LineReader, render, take_line};
    use crate::event::Event;

    #[tokio::test]
    async fn reads_crlf_lf_and_a_final_fragment() {
        let (a, mut b) = tokio::io::duplex(64);
        tokio::spawn(async move {
            b.write_all(b"hello\r\nworld\n\nbye").await.unwrap();
        });

        let mut lr = LineReader::new(a);
        assert_eq!(lr.read_line().await.unwrap().as_deref(), Some("hello"));
        assert_eq!(lr.read_line().await.unwrap().as_deref(), Some("world"));
        assert_eq!(lr.read_line().await.unwrap().as_deref(), Some(""));
        assert_eq!(lr.read_line().await.unwrap().as_deref(), Some("bye"));
        assert_eq!(lr.read_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn overlong_lines_are_rejected() {
        let (a, mut b) = tokio::io::duplex(256);
        tokio::spawn(async move {
            b.write_all(&[b'x'; 100]).await.unwrap();
        });
        let mut lr = LineReader::new(a).max_line_len(16);
        assert!(lr.read_line().await.is_err());
    }

    #[test]
    fn decoded_frames_are_wiped() {
        let mut raw = b"hunter2\r\n".to_vec();
        assert_eq!(take_line(&mut raw), "hunter2");
        assert!(raw.iter().all(|b| *b == 0));
    }

    #[test]
    fn renders_text_and_tables() {
        assert_eq!(render(&Event::text("a\nb")).unwrap(), "a\r\nb\r\n");
        assert!(render(&Event::Gmcp {
            cmd: "Char.Vitals".to_string(),
            data: serde_json::json!({}),
        })
        .is_none());

        let t = render(&Event::Table {
            title: "Online".to_string(),
            columns: vec!["name".to_string(), "level".to_string()],
            rows: vec![vec!["ann".to_string(), "5".to_string()]],
        })
        .unwrap();
        assert_eq!(t, "Online\r\nname  level\r\n----  -----\r\nann   5\r\n");
    }
}
