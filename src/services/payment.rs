//! Проверка подлинности callback'ов платёжного шлюза.
//!
//! Шлюз подписывает уведомление токеном
//! `sha256(booking_id ‖ status ‖ transaction_id ‖ secret)` в hex.
//! Если секрет не задан, токен не проверяется (локальная разработка).

use sha2::{Digest, Sha256};

use crate::models::PaymentNotification;

#[derive(Debug, Clone, Default)]
pub struct CallbackSigner {
    secret: Option<String>,
}

impl CallbackSigner {
    pub fn new(secret: Option<String>) -> Self {
        Self { secret }
    }

    pub fn is_enabled(&self) -> bool {
        self.secret.is_some()
    }

    /// Токен для уведомления. `None`, если секрет не настроен.
    pub fn sign(&self, notification: &PaymentNotification) -> Option<String> {
        let secret = self.secret.as_deref()?;
        let token_string = format!(
            "{}{}{}{}",
            notification.booking_id,
            notification.status.as_str(),
            notification.transaction_id.as_deref().unwrap_or_default(),
            secret
        );
        let mut hasher = Sha256::new();
        hasher.update(token_string.as_bytes());
        Some(format!("{:x}", hasher.finalize()))
    }

    pub fn verify(&self, notification: &PaymentNotification) -> bool {
        match self.sign(notification) {
            None => true,
            Some(expected) => notification
                .token
                .as_deref()
                .is_some_and(|token| token.eq_ignore_ascii_case(&expected)),
        }
    }
}
