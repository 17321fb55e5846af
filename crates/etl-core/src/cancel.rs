//! Señal de cancelación cooperativa.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken as AsyncToken;

/// Bandera compartida. Los steps la consultan en los límites de lote; las
/// esperas de backoff se interrumpen al cancelar.
///
/// El estado vive en un `tokio_util` token, de modo que las tareas async
/// pueden esperar la misma cancelación (`child_token`). El `Condvar` sólo
/// despierta las esperas síncronas del executor.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    token: AsyncToken,
    wake: Arc<(Mutex<()>, Condvar)>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.token.cancel();
        let (lock, cv) = &*self.wake;
        // El lock ordena la notificación respecto del chequeo en `sleep`.
        let _guard = lock.lock().unwrap_or_else(|p| p.into_inner());
        cv.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Token hijo para tareas async: se cancela con éste, no al revés.
    pub fn child_token(&self) -> AsyncToken {
        self.token.child_token()
    }

    /// Duerme hasta `duration` o hasta la cancelación. Devuelve `true` si
    /// la espera terminó sin cancelación.
    pub fn sleep(&self, duration: Duration) -> bool {
        let (lock, cv) = &*self.wake;
        let deadline = Instant::now() + duration;
        let mut guard = lock.lock().unwrap_or_else(|p| p.into_inner());
        while !self.token.is_cancelled() {
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            guard = match cv.wait_timeout(guard, deadline - now) {
                Ok((g, _)) => g,
                Err(p) => p.into_inner().0,
            };
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleep_is_interrupted_by_cancel() {
        let token = CancellationToken::new();
        let other = token.clone();
        let handle = std::thread::spawn(move || other.sleep(Duration::from_secs(30)));
        std::thread::sleep(Duration::from_millis(20));
        token.cancel();
        assert!(!handle.join().unwrap());
        assert!(token.is_cancelled());
    }

    #[test]
    fn child_token_follows_cancel() {
        let token = CancellationToken::new();
        let child = token.child_token();
        assert!(!child.is_cancelled());
        token.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn short_sleep_completes() {
        assert!(CancellationToken::new().sleep(Duration::from_millis(1)));
    }
}
