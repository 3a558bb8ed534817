//! 短期记忆：单次 run 的对话记录
//!
//! 保留最近 N 轮消息（user/assistant 对），超出时剪枝；system 提示词不入此表，由 Planner 每轮拼接。

use serde::{Deserialize, Serialize};

/// 消息角色（与 OpenAI chat API 一致，序列化为小写）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// 最近 N 轮对话（每轮含 user + assistant，故实际保留约 max_turns*2 条消息）
///
/// 首条消息（本次 run 的用户任务）永远保留，否则剪枝后模型会丢失目标。
#[derive(Clone, Debug)]
pub struct ConversationMemory {
    messages: Vec<Message>,
    max_turns: usize,
}

impl ConversationMemory {
    pub fn new(max_turns: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_turns: max_turns.max(1),
        }
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
        self.prune();
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    fn prune(&mut self) {
        let keep = self.max_turns * 2;
        if self.messages.len() > keep + 1 {
            let excess = self.messages.len() - keep - 1;
            self.messages.drain(1..1 + excess);
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&Message::assistant("hi")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"hi"}"#);
    }

    #[test]
    fn test_prune_keeps_task_message() {
        let mut mem = ConversationMemory::new(1);
        mem.push(Message::user("task"));
        for i in 0..5 {
            mem.push(Message::assistant(format!("a{i}")));
            mem.push(Message::user(format!("u{i}")));
        }
        assert_eq!(mem.len(), 3);
        assert_eq!(mem.messages()[0].content, "task");
        assert_eq!(mem.messages()[1].content, "a4");
        assert_eq!(mem.messages()[2].content, "u4");
    }
}
