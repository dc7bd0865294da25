//! 事件帧解码器：纯增量解析，字节进、帧出，无 I/O
//!
//! 线上格式：记录之间以空行（`\n\n`）分隔；记录内以 `data:` 开头的行承载 JSON，
//! 其余行忽略。缓冲区按字节累积，分隔符只含 ASCII，因此跨 `feed` 调用被截断的
//! 多字节 UTF-8 序列会原样留在尾部，等下一块到达后再一起解码。

use bytes::{Buf, BytesMut};
use serde_json::Value;

use super::frame::Frame;

const RECORD_SEPARATOR: &[u8] = b"\n\n";
const DATA_PREFIX: &str = "data:";

/// 单条流的解码器；缓冲区只保存当前记录未终止的尾部
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一块字节，返回其中所有完整记录解出的帧（按到达顺序）
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        if chunk.is_empty() {
            return Vec::new();
        }
        // 分隔符可能跨块：只需从上次扫描位置前一个字节开始找
        let scan_from = self.buffer.len().saturating_sub(RECORD_SEPARATOR.len() - 1);
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut from = scan_from;
        while let Some(pos) = find_separator(&self.buffer[from..]) {
            let end = from + pos;
            let record = self.buffer.split_to(end);
            self.buffer.advance(RECORD_SEPARATOR.len());
            if let Some(frame) = decode_record(&record, false) {
                frames.push(frame);
            }
            from = 0;
        }
        frames
    }

    /// 流结束时尽力解码剩余的未终止记录，最多返回一帧
    pub fn finish(&mut self) -> Option<Frame> {
        let rest = self.buffer.split();
        decode_record(&rest, true)
    }

    /// 丢弃已缓冲的半条记录（取消时使用，不冲刷）
    pub fn discard(&mut self) {
        self.buffer.clear();
    }

    /// 当前缓冲的字节数
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

fn find_separator(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(RECORD_SEPARATOR.len())
        .position(|w| w == RECORD_SEPARATOR)
}

/// 解码一条记录：取出所有 data 行、去前缀、以换行拼接后做 JSON 解析
///
/// 没有 data 行的记录直接忽略；只有流尾排空（`bare_fallback`）时才把整段文本当作候选，
/// 兼容缺少前缀的尾部记录。解析失败返回 None：心跳噪声或半截数据不应中断整条流。
fn decode_record(record: &[u8], bare_fallback: bool) -> Option<Frame> {
    let text = String::from_utf8_lossy(record);
    if text.trim().is_empty() {
        return None;
    }

    let data_lines: Vec<&str> = text
        .split('\n')
        .map(|line| line.trim_end_matches('\r').trim_start())
        .filter_map(|line| line.strip_prefix(DATA_PREFIX))
        .map(str::trim_start)
        .collect();

    let candidate = match (data_lines.is_empty(), bare_fallback) {
        (false, _) => data_lines.join("\n"),
        (true, true) => text.trim().to_string(),
        (true, false) => {
            tracing::debug!("Ignoring record without data lines ({} bytes)", record.len());
            return None;
        }
    };

    match serde_json::from_str::<Value>(&candidate) {
        Ok(value) => Some(Frame::from_value(value)),
        Err(e) => {
            tracing::debug!("Dropping malformed record ({} bytes): {}", record.len(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::{PhaseKind, StatusKind};

    const STREAM: &str = concat!(
        "data: {\"status\":\"starting\",\"files\":[\"a.csv\"]}\n\n",
        "data: {\"phase\":\"parse\",\"msg\":\"Détection de l'en-tête\"}\n\n",
        ": comment line\n\n",
        "data: {\"phase\":\"chunk\",\"produced\":4}\n\n",
        "data: not-json\n\n",
        "data: {\"phase\":\"chunk\",\"total_produced\":10}\n\n",
        "data: {\"phase\":\"hb\",\"ts\":1}\n\n",
        "data: {\"phase\":\"insert\",\"count\":5}\n\n",
        "data: {\"status\":\"complete\"}\n\n",
    );

    fn decode_in_pieces(input: &[u8], sizes: &[usize]) -> Vec<Frame> {
        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        let mut rest = input;
        let mut i = 0;
        while !rest.is_empty() {
            let n = sizes[i % sizes.len()].min(rest.len()).max(1);
            frames.extend(decoder.feed(&rest[..n]));
            rest = &rest[n..];
            i += 1;
        }
        frames.extend(decoder.finish());
        frames
    }

    #[test]
    fn test_single_chunk_yields_all_frames_in_order() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(STREAM.as_bytes());
        assert_eq!(frames.len(), 7);
        assert!(frames[0].is_status(StatusKind::Starting));
        assert!(frames[6].is_status(StatusKind::Complete));
        assert_eq!(decoder.buffered_len(), 0);
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn test_chunk_boundary_independence() {
        let whole = decode_in_pieces(STREAM.as_bytes(), &[STREAM.len()]);
        for sizes in [&[1usize][..], &[2], &[3, 7], &[5, 1, 13], &[64]] {
            assert_eq!(decode_in_pieces(STREAM.as_bytes(), sizes), whole, "sizes {:?}", sizes);
        }
    }

    #[test]
    fn test_separator_split_across_feeds() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed(b"data: {\"phase\":\"embed\",\"count\":3}\n").is_empty());
        let frames = decoder.feed(b"\ndata: {\"phase\"");
        assert_eq!(frames.len(), 1);
        assert!(matches!(&frames[0], Frame::Phase(r) if r.phase == PhaseKind::Embed && r.count == Some(3)));
        assert_eq!(decoder.buffered_len(), "data: {\"phase\"".len());
    }

    #[test]
    fn test_multibyte_sequence_split_across_feeds() {
        let record = "data: {\"phase\":\"parse\",\"msg\":\"表头检测\"}\n\n".as_bytes();
        let split = record.iter().position(|&b| b >= 0x80).unwrap() + 1;
        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed(&record[..split]).is_empty());
        let frames = decoder.feed(&record[split..]);
        let Frame::Phase(phase) = &frames[0] else {
            panic!("expected phase frame");
        };
        assert_eq!(phase.message.as_deref(), Some("表头检测"));
    }

    #[test]
    fn test_empty_chunk_yields_nothing() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed(b"").is_empty());
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn test_malformed_record_is_swallowed() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed(b"data: not-json\n\n").is_empty());
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn test_finish_drains_trailing_record() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(b"data: {\"phase\":\"insert\",\"count\":1}\n\ndata: {\"status\":\"complete\"}");
        assert_eq!(frames.len(), 1);
        let last = decoder.finish().expect("trailing frame");
        assert!(last.is_status(StatusKind::Complete));
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn test_record_without_data_line_is_ignored_mid_stream() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(b"{\"status\":\"complete\"}\n\nevent: ping\n\ndata: {\"phase\":\"embed\",\"count\":1}\n\n");
        assert_eq!(frames.len(), 1);
        assert!(matches!(&frames[0], Frame::Phase(r) if r.phase == PhaseKind::Embed));
        assert!(!frames.iter().any(|f| f.is_status(StatusKind::Complete)));
    }

    #[test]
    fn test_finish_accepts_bare_trailing_json() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed(b"{\"status\":\"complete\"}").is_empty());
        assert!(decoder.finish().expect("bare trailing frame").is_status(StatusKind::Complete));
    }

    #[test]
    fn test_finish_swallows_trailing_garbage() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(b"data: {\"status\":\"comp");
        assert!(decoder.finish().is_none());
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn test_crlf_lines_and_multiline_data() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(b"event: progress\r\ndata: {\"phase\":\"insert\",\r\ndata: \"count\":2}\r\n\n");
        assert_eq!(frames.len(), 1);
        assert!(matches!(&frames[0], Frame::Phase(r) if r.count == Some(2)));
    }

    #[test]
    fn test_discard_drops_partial_record() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(b"data: {\"status\":\"complete\"}");
        decoder.discard();
        assert!(decoder.finish().is_none());
    }
}
