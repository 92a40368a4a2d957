use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct Inner {
    next_seq: AtomicU64,
    tokens: Mutex<HashMap<String, (u64, CancellationToken)>>,
}

/** \brief 按请求标识管理进行中的对话取消令牌。 */
#[derive(Debug, Default, Clone)]
pub struct CancelRegistry {
    inner: Arc<Inner>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /**
     * \brief 登记一个请求；返回的守卫在释放时自动注销。
     *
     * 同一标识重复登记时，旧请求会先被取消。
     */
    pub fn register(&self, request_id: &str) -> RegisteredToken {
        let token = CancellationToken::new();
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let mut guard = self
            .inner
            .tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some((_, previous)) = guard.insert(request_id.to_string(), (seq, token.clone())) {
            previous.cancel();
        }
        RegisteredToken {
            registration: Some((self.clone(), request_id.to_string(), seq)),
            token,
        }
    }

    /** \brief 无标识请求使用的令牌，不进入登记表。 */
    pub fn detached(&self) -> RegisteredToken {
        RegisteredToken {
            registration: None,
            token: CancellationToken::new(),
        }
    }

    /** \brief 取消指定请求，返回是否找到该请求。 */
    pub fn cancel(&self, request_id: &str) -> bool {
        let removed = self
            .inner
            .tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(request_id);
        match removed {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.inner
            .tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn release(&self, request_id: &str, seq: u64) {
        let mut guard = self
            .inner
            .tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // 同名的新请求可能已覆盖此登记
        if guard.get(request_id).map(|(s, _)| *s) == Some(seq) {
            guard.remove(request_id);
        }
    }
}

/**
 * \brief 已登记的令牌，释放时从登记表中移除。
 */
#[derive(Debug)]
pub struct RegisteredToken {
    registration: Option<(CancelRegistry, String, u64)>,
    token: CancellationToken,
}

impl RegisteredToken {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for RegisteredToken {
    fn drop(&mut self) {
        if let Some((registry, id, seq)) = self.registration.take() {
            registry.release(&id, seq);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_registered_request() {
        let registry = CancelRegistry::new();
        let handle = registry.register("req-1");
        assert_eq!(registry.in_flight(), 1);
        assert!(registry.cancel("req-1"));
        assert!(handle.token().is_cancelled());
        assert!(!registry.cancel("req-1"));
    }

    #[test]
    fn test_drop_releases_entry() {
        let registry = CancelRegistry::new();
        {
            let _handle = registry.register("req-1");
            assert_eq!(registry.in_flight(), 1);
        }
        assert_eq!(registry.in_flight(), 0);
        assert!(!registry.cancel("req-1"));
    }

    #[test]
    fn test_reregister_cancels_previous_and_survives_old_drop() {
        let registry = CancelRegistry::new();
        let first = registry.register("same");
        let second = registry.register("same");
        assert!(first.token().is_cancelled());
        drop(first);
        assert_eq!(registry.in_flight(), 1);
        assert!(registry.cancel("same"));
        assert!(second.token().is_cancelled());
    }

    #[test]
    fn test_detached_is_not_tracked() {
        let registry = CancelRegistry::new();
        let handle = registry.detached();
        assert_eq!(registry.in_flight(), 0);
        assert!(!handle.token().is_cancelled());
    }
}
