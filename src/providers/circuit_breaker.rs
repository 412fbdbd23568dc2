//! Автоматический выключатель для исходящих вызовов провайдеров.
//!
//! После `failure_threshold` сбоев подряд цепь размыкается, и вызовы
//! отклоняются сразу, не дожидаясь таймаута HTTP. Через `open_timeout`
//! пропускается пробный запрос: успех замыкает цепь, сбой снова размыкает.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use super::ProviderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Нормальная работа.
    Closed,
    /// Запросы блокируются до истечения таймаута.
    Open,
    /// Пробный запрос после таймаута.
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    inner: Mutex<Inner>,
    failure_threshold: u32,
    open_timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: u32, open_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                opened_at: None,
            }),
            failure_threshold: failure_threshold.max(1),
            open_timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Можно ли выполнить следующий запрос.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.lock();

        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(self.open_timeout);
                if elapsed >= self.open_timeout {
                    inner.state = CircuitState::HalfOpen;
                    info!(breaker = %self.name, "Circuit breaker transitioning to HalfOpen state");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            info!(breaker = %self.name, "Circuit breaker recovered - transitioning to Closed state");
        }
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.opened_at = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.failure_count += 1;

        match inner.state {
            CircuitState::Closed if inner.failure_count >= self.failure_threshold => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                error!(
                    breaker = %self.name,
                    failures = inner.failure_count,
                    threshold = self.failure_threshold,
                    "Circuit breaker OPENED"
                );
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                warn!(breaker = %self.name, "Circuit breaker test failed - returning to Open state");
            }
            _ => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Выполняет вызов провайдера под защитой выключателя.
    /// Отказы провайдера (4xx) не считаются сбоем: сервис отвечает.
    pub async fn call<F, T>(&self, operation: F) -> Result<T, ProviderError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        if !self.can_execute() {
            warn!(breaker = %self.name, "Circuit breaker is OPEN - blocking provider request");
            return Err(ProviderError::CircuitOpen);
        }

        match operation.await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                if err.is_outage() {
                    error!(breaker = %self.name, error = %err, "Provider request failed");
                    self.record_failure();
                } else {
                    self.record_success();
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold() {
        let breaker = CircuitBreaker::new("card", 2, Duration::from_secs(60));

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.can_execute());
    }

    #[test]
    fn half_open_probe_closes_on_success() {
        let breaker = CircuitBreaker::new("card", 1, Duration::ZERO);
        breaker.record_failure();

        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn failed_probe_reopens() {
        let breaker = CircuitBreaker::new("card", 1, Duration::ZERO);
        breaker.record_failure();
        assert!(breaker.can_execute());

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn open_circuit_short_circuits_calls() {
        let breaker = CircuitBreaker::new("card", 1, Duration::from_secs(60));
        let _ = breaker
            .call(async { Err::<(), _>(ProviderError::Transport("down".into())) })
            .await;

        let err = breaker.call(async { Ok::<_, ProviderError>(1) }).await.unwrap_err();
        assert!(matches!(err, ProviderError::CircuitOpen));
    }

    #[tokio::test]
    async fn rejections_do_not_trip_the_breaker() {
        let breaker = CircuitBreaker::new("card", 1, Duration::from_secs(60));
        let _ = breaker
            .call(async { Err::<(), _>(ProviderError::Rejected("400".into())) })
            .await;
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
