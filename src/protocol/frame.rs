//! 帧模型：入库事件流中一条记录解码后的结构化事件
//!
//! 记录体是一个 JSON 对象；带 `status` 键的是状态记录，带 `phase` 键的是阶段记录。
//! 合法 JSON 但两者都不匹配的对象保留为 `Unrecognized`，由聚合器忽略。

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 一条已解码的事件帧（解码后不可变）
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Status(StatusRecord),
    Phase(PhaseRecord),
    /// 合法 JSON，但没有可识别的 `status` / `phase` 键
    Unrecognized(Value),
}

/// 运行级状态：starting / complete / error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Starting,
    Complete,
    Error,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub status: StatusKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// 流水线阶段；线上心跳写作 `hb`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseKind {
    Parse,
    Chunk,
    Embed,
    Insert,
    #[serde(rename = "hb", alias = "heartbeat")]
    Heartbeat,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase: PhaseKind,
    #[serde(default, rename = "msg", alias = "message", skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// embed / insert 的本批数量（增量）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    /// chunk 阶段本批产出的分块数（增量）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub produced: Option<u64>,
    /// chunk 阶段的总分块数（绝对值，覆盖此前的值）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_produced: Option<u64>,
}

impl Frame {
    /// 将一个 JSON 值分类为帧；`status` 优先于 `phase`
    ///
    /// 字段类型不符（如 `count` 是字符串）的对象归为 `Unrecognized`，不报错。
    pub fn from_value(value: Value) -> Frame {
        let Some(obj) = value.as_object() else {
            return Frame::Unrecognized(value);
        };
        if obj.contains_key("status") {
            return match serde_json::from_value::<StatusRecord>(value.clone()) {
                Ok(record) => Frame::Status(record),
                Err(_) => Frame::Unrecognized(value),
            };
        }
        if obj.contains_key("phase") {
            return match serde_json::from_value::<PhaseRecord>(value.clone()) {
                Ok(record) => Frame::Phase(record),
                Err(_) => Frame::Unrecognized(value),
            };
        }
        Frame::Unrecognized(value)
    }

    pub fn is_status(&self, kind: StatusKind) -> bool {
        matches!(self, Frame::Status(record) if record.status == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_starting_with_files() {
        let frame = Frame::from_value(json!({"status": "starting", "files": ["a.csv", "b.csv"]}));
        match frame {
            Frame::Status(record) => {
                assert_eq!(record.status, StatusKind::Starting);
                assert_eq!(record.files.unwrap(), vec!["a.csv", "b.csv"]);
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_heartbeat_wire_name() {
        let frame = Frame::from_value(json!({"phase": "hb", "ts": 1700000000}));
        assert!(matches!(frame, Frame::Phase(PhaseRecord { phase: PhaseKind::Heartbeat, .. })));
    }

    #[test]
    fn test_extra_fields_do_not_drop_counters() {
        let frame = Frame::from_value(json!({
            "phase": "insert",
            "count": 5,
            "ts": 1700000000.25,
            "batch": {"id": "b-1"}
        }));
        let Frame::Phase(record) = frame else {
            panic!("expected phase frame");
        };
        assert_eq!(record.phase, PhaseKind::Insert);
        assert_eq!(record.count, Some(5));
    }

    #[test]
    fn test_parse_msg_maps_to_message() {
        let frame = Frame::from_value(json!({"phase": "parse", "msg": "Detecting header…"}));
        let Frame::Phase(record) = frame else {
            panic!("expected phase frame");
        };
        assert_eq!(record.message.as_deref(), Some("Detecting header…"));
    }

    #[test]
    fn test_status_takes_precedence_over_phase() {
        let frame = Frame::from_value(json!({"status": "complete", "phase": "insert"}));
        assert!(frame.is_status(StatusKind::Complete));
    }

    #[test]
    fn test_unknown_values_do_not_fail() {
        let frame = Frame::from_value(json!({"phase": "rerank"}));
        assert!(matches!(frame, Frame::Phase(PhaseRecord { phase: PhaseKind::Unknown, .. })));

        let frame = Frame::from_value(json!({"status": "queued"}));
        assert!(frame.is_status(StatusKind::Unknown));
    }

    #[test]
    fn test_unrecognized_shapes() {
        assert!(matches!(Frame::from_value(json!({"ok": true})), Frame::Unrecognized(_)));
        assert!(matches!(Frame::from_value(json!([1, 2])), Frame::Unrecognized(_)));
        assert!(matches!(
            Frame::from_value(json!({"phase": "embed", "count": "many"})),
            Frame::Unrecognized(_)
        ));
    }
}
