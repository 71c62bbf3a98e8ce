//! 主题路由（routing）
//!
//! 提供订阅登记与消息分发的基础构件：
//! - `TopicPattern`：编译后的主题通配模式；
//! - `MessageHandler`：订阅方回调协议与订阅参数；
//! - `TopicRouter`：以处理器 ID 为键的订阅 arena 与匹配查询。
//!
pub mod pattern;
pub mod router;
pub mod subscription;

pub use pattern::TopicPattern;
pub use router::TopicRouter;
pub use subscription::{HandlerId, MessageHandler, SubscribeOptions, Subscription};
