//! 领域事件与进程内事件总线
//!
//! 事件是带类型的枚举，监听者实现 `EventListener` 并在启动时订阅。
//! 总线在调用方的执行流中同步投递：按订阅顺序依次调用监听者，
//! 某个监听者失败只记录日志，不影响后续监听者。

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, error};

use crate::error::Result;
use crate::models::{MessageId, RequestId, RequestStatus, ThreadId, UserId};

/// 事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    UserCreated,
    RequestCreated,
    RequestStatusChanged,
    MessageAdded,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserCreated => "api:user:created",
            Self::RequestCreated => "request:created",
            Self::RequestStatusChanged => "request:status-changed",
            Self::MessageAdded => "thread:message-added",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 请求状态变更
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusChanged {
    pub request_id: RequestId,
    pub old_status: RequestStatus,
    pub new_status: RequestStatus,
    pub actor_id: UserId,
    /// 变更前后任一时刻的承接者，撤回/拒绝后依然能找到对方
    pub provider_id: Option<UserId>,
}

/// 领域事件，只携带 ID，监听者自行加载最新数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DomainEvent {
    UserCreated {
        user_id: UserId,
    },
    RequestCreated {
        request_id: RequestId,
        creator_id: UserId,
    },
    RequestStatusChanged(StatusChanged),
    MessageAdded {
        thread_id: ThreadId,
        message_id: MessageId,
        sender_id: UserId,
    },
}

impl DomainEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::UserCreated { .. } => EventKind::UserCreated,
            Self::RequestCreated { .. } => EventKind::RequestCreated,
            Self::RequestStatusChanged(_) => EventKind::RequestStatusChanged,
            Self::MessageAdded { .. } => EventKind::MessageAdded,
        }
    }
}

/// 事件监听者
#[async_trait]
pub trait EventListener: Send + Sync {
    /// 监听者名称（用于日志）
    fn name(&self) -> &str;

    /// 是否关心该类型的事件，默认全部接收
    fn interested_in(&self, _kind: EventKind) -> bool {
        true
    }

    /// 处理同一事务内产生的一批事件
    ///
    /// 监听者不得阻塞，耗时工作交给后台 Worker。
    async fn on_events(&self, events: &[DomainEvent]) -> Result<()>;
}

/// 进程内事件总线
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<Arc<dyn EventListener>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// 订阅事件，投递顺序与订阅顺序一致
    pub fn subscribe(&self, listener: Arc<dyn EventListener>) {
        debug!(listener = listener.name(), "注册事件监听者");
        self.listeners.write().push(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    pub async fn emit(&self, event: DomainEvent) {
        self.emit_all(std::slice::from_ref(&event)).await;
    }

    /// 投递同一事务内产生的一批事件
    pub async fn emit_all(&self, events: &[DomainEvent]) {
        if events.is_empty() {
            return;
        }

        // 复制一份监听者列表，避免持锁跨 await
        let listeners: Vec<Arc<dyn EventListener>> = self.listeners.read().clone();

        for listener in listeners {
            let relevant: Vec<DomainEvent> = events
                .iter()
                .filter(|e| listener.interested_in(e.kind()))
                .cloned()
                .collect();
            if relevant.is_empty() {
                continue;
            }

            if let Err(e) = listener.on_events(&relevant).await {
                error!(
                    listener = listener.name(),
                    events = relevant.len(),
                    error = %e,
                    "事件监听者处理失败"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::error::AppError;

    struct Recorder {
        name: &'static str,
        only: Option<EventKind>,
        fail: bool,
        log: Arc<Mutex<Vec<(String, EventKind)>>>,
    }

    #[async_trait]
    impl EventListener for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn interested_in(&self, kind: EventKind) -> bool {
            self.only.is_none_or(|only| only == kind)
        }

        async fn on_events(&self, events: &[DomainEvent]) -> Result<()> {
            let mut log = self.log.lock();
            for event in events {
                log.push((self.name.to_string(), event.kind()));
            }
            if self.fail {
                return Err(AppError::Internal("listener failed".into()));
            }
            Ok(())
        }
    }

    fn message_added() -> DomainEvent {
        DomainEvent::MessageAdded {
            thread_id: ThreadId(1),
            message_id: MessageId(2),
            sender_id: UserId(3),
        }
    }

    #[tokio::test]
    async fn test_delivers_in_registration_order_despite_failures() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let bus = EventBus::new();
        bus.subscribe(Arc::new(Recorder {
            name: "first",
            only: None,
            fail: true,
            log: log.clone(),
        }));
        bus.subscribe(Arc::new(Recorder {
            name: "second",
            only: None,
            fail: false,
            log: log.clone(),
        }));

        bus.emit(message_added()).await;

        let log = log.lock();
        assert_eq!(
            *log,
            vec![
                ("first".to_string(), EventKind::MessageAdded),
                ("second".to_string(), EventKind::MessageAdded),
            ]
        );
    }

    #[tokio::test]
    async fn test_filters_by_kind() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let bus = EventBus::new();
        bus.subscribe(Arc::new(Recorder {
            name: "users-only",
            only: Some(EventKind::UserCreated),
            fail: false,
            log: log.clone(),
        }));

        bus.emit_all(&[message_added(), DomainEvent::UserCreated { user_id: UserId(9) }])
            .await;

        assert_eq!(
            *log.lock(),
            vec![("users-only".to_string(), EventKind::UserCreated)]
        );
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(EventKind::UserCreated.as_str(), "api:user:created");
        assert_eq!(
            EventKind::RequestStatusChanged.to_string(),
            "request:status-changed"
        );
        assert_eq!(message_added().kind().as_str(), "thread:message-added");
    }
}
