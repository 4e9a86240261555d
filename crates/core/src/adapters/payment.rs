use async_trait::async_trait;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

use crate::adapters::{AdapterError, PaymentTokenizer};
use crate::domain::guest::{CardDetails, CardVendor, PaymentReference};

type HmacSha256 = Hmac<Sha256>;

const SERVICE: &str = "payment_tokenizer";

/// Local tokenizer: derives a stable opaque token from the card number with
/// HMAC-SHA256. No card data leaves the process.
#[derive(Clone, Debug)]
pub struct HmacTokenizer {
    secret: SecretString,
}

impl HmacTokenizer {
    pub fn new(secret: SecretString) -> Self {
        Self { secret }
    }

    fn token_for(&self, digits: &str) -> Result<String, AdapterError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes()).map_err(
            |error| AdapterError::Unavailable {
                service: SERVICE,
                message: format!("tokenizer key rejected: {error}"),
            },
        )?;
        mac.update(digits.as_bytes());
        let digest = mac.finalize().into_bytes();

        let hex: String = digest.iter().take(16).map(|byte| format!("{byte:02x}")).collect();
        Ok(format!("tok_{hex}"))
    }
}

#[async_trait]
impl PaymentTokenizer for HmacTokenizer {
    async fn tokenize(&self, card: &CardDetails) -> Result<PaymentReference, AdapterError> {
        let digits = card.number.expose_secret();
        if !passes_luhn(digits) {
            return Err(AdapterError::InvalidInput {
                service: SERVICE,
                message: "card number failed checksum validation".to_owned(),
            });
        }

        Ok(PaymentReference {
            token: self.token_for(digits)?,
            card_vendor: CardVendor::from_card_number(digits),
            last_four: card.last_four(),
            expiry_month: card.expiry_month,
            expiry_year: card.expiry_year,
            holder_name: card.holder_name.clone(),
        })
    }
}

fn passes_luhn(digits: &str) -> bool {
    if digits.is_empty() || !digits.chars().all(|ch| ch.is_ascii_digit()) {
        return false;
    }

    let sum: u32 = digits
        .chars()
        .rev()
        .filter_map(|ch| ch.to_digit(10))
        .enumerate()
        .map(|(index, digit)| {
            if index % 2 == 1 {
                let doubled = digit * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                digit
            }
        })
        .sum();
    sum % 10 == 0
}

#[cfg(test)]
mod tests {
    use crate::adapters::payment::{passes_luhn, HmacTokenizer};
    use crate::adapters::{AdapterError, PaymentTokenizer};
    use crate::domain::guest::{CardDetails, CardVendor};

    fn card(number: &str) -> CardDetails {
        CardDetails {
            number: number.to_owned().into(),
            cvv: "123".to_owned().into(),
            expiry_month: 12,
            expiry_year: 2030,
            holder_name: "Ada Lovelace".to_owned(),
        }
    }

    fn tokenizer() -> HmacTokenizer {
        HmacTokenizer::new("test-tokenizer-secret-0001".to_owned().into())
    }

    #[test]
    fn luhn_accepts_test_cards_and_rejects_typos() {
        assert!(passes_luhn("4111111111111111"));
        assert!(passes_luhn("378282246310005"));
        assert!(!passes_luhn("4111111111111112"));
        assert!(!passes_luhn(""));
    }

    #[tokio::test]
    async fn tokens_are_stable_and_never_contain_the_number() -> Result<(), AdapterError> {
        let first = tokenizer().tokenize(&card("4111111111111111")).await?;
        let second = tokenizer().tokenize(&card("4111111111111111")).await?;

        assert_eq!(first.token, second.token);
        assert!(first.token.starts_with("tok_"));
        assert_eq!(first.token.len(), 36);
        assert!(!first.token.contains("4111111111111111"));
        assert_eq!(first.card_vendor, CardVendor::Visa);
        assert_eq!(first.last_four, "1111");
        Ok(())
    }

    #[tokio::test]
    async fn different_secrets_produce_different_tokens() -> Result<(), AdapterError> {
        let other = HmacTokenizer::new("another-tokenizer-secret".to_owned().into());
        let left = tokenizer().tokenize(&card("5500005555555559")).await?;
        let right = other.tokenize(&card("5500005555555559")).await?;

        assert_ne!(left.token, right.token);
        assert_eq!(left.card_vendor, CardVendor::Mastercard);
        Ok(())
    }

    #[tokio::test]
    async fn checksum_failures_are_invalid_input() {
        let result = tokenizer().tokenize(&card("4111111111111112")).await;
        assert!(matches!(result, Err(AdapterError::InvalidInput { .. })));
    }
}
