//! 主题通配模式（TopicPattern）
//!
//! 采用点分段的主题语法：`*` 精确匹配一个段，`#` 匹配零个或多个段。
//! 订阅主题在登记时编译一次，发布路径上只做段匹配，不再解析字符串。
//!
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
enum Segment {
    Literal(String),
    /// `*`：恰好一个段
    One,
    /// `#`：零个或多个段
    Rest,
}

/// 编译后的主题模式
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicPattern {
    segments: Vec<Segment>,
}

impl TopicPattern {
    /// 主题字符串是否包含通配段
    pub fn is_pattern(topic: &str) -> bool {
        topic.split('.').any(|s| s == "*" || s == "#")
    }

    /// 编译主题字符串为可匹配的模式
    pub fn compile(topic: &str) -> Self {
        let segments = topic
            .split('.')
            .map(|s| match s {
                "*" => Segment::One,
                "#" => Segment::Rest,
                literal => Segment::Literal(literal.to_string()),
            })
            .collect();

        Self { segments }
    }

    /// 判断一个具体主题是否命中该模式
    pub fn matches(&self, topic: &str) -> bool {
        let parts: Vec<&str> = topic.split('.').collect();
        Self::match_from(&self.segments, &parts)
    }

    fn match_from(pattern: &[Segment], topic: &[&str]) -> bool {
        match pattern.first() {
            None => topic.is_empty(),
            Some(Segment::Literal(lit)) => topic
                .first()
                .is_some_and(|head| *head == lit.as_str() && Self::match_from(&pattern[1..], &topic[1..])),
            Some(Segment::One) => {
                !topic.is_empty() && Self::match_from(&pattern[1..], &topic[1..])
            }
            Some(Segment::Rest) => {
                // `#` 允许吞掉任意数量的段，逐位置回溯尝试
                (0..=topic.len()).any(|n| Self::match_from(&pattern[1..], &topic[n..]))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_topics_are_not_patterns() {
        assert!(!TopicPattern::is_pattern("order.created"));
        assert!(TopicPattern::is_pattern("order.*"));
        assert!(TopicPattern::is_pattern("audit.#"));
    }

    #[test]
    fn star_matches_exactly_one_segment() {
        let pattern = TopicPattern::compile("order.*");

        assert!(pattern.matches("order.created"));
        assert!(pattern.matches("order.cancelled"));
        assert!(!pattern.matches("invoice.created"));
        assert!(!pattern.matches("order"));
        assert!(!pattern.matches("order.item.added"));
    }

    #[test]
    fn hash_matches_zero_or_more_segments() {
        let pattern = TopicPattern::compile("event.#");

        assert!(pattern.matches("event"));
        assert!(pattern.matches("event.todo_created"));
        assert!(pattern.matches("event.todo.created"));
        assert!(!pattern.matches("saga.completed"));
    }

    #[test]
    fn mixed_wildcards_backtrack() {
        let pattern = TopicPattern::compile("#.failed.*");

        assert!(pattern.matches("order.failed.payment"));
        assert!(pattern.matches("a.b.failed.x"));
        assert!(!pattern.matches("order.failed"));
    }
}
