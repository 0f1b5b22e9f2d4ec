use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// A charge intent handed to the client so it can run the gateway's payment
/// flow. The gateway itself is opaque to this service.
#[derive(Clone, Debug, Serialize)]
pub struct ChargeIntent {
    pub gateway_order_id: String,
    pub amount: i64,
    pub currency: String,
    pub receipt_id: String,
}

/// The confirmation the gateway posts back after a charge succeeds.
#[derive(Clone, Debug, Deserialize)]
pub struct GatewayConfirmation {
    pub gateway_order_id: String,
    pub payment_id: String,
    pub signature: String,
}

/// Mints a charge intent for `amount`. The gateway order id is what the
/// confirmation will later reference.
pub fn create_charge_intent(amount: i64, currency: &str) -> ChargeIntent {
    let nonce = Uuid::new_v4().simple().to_string();
    ChargeIntent {
        gateway_order_id: format!("order_{nonce}"),
        amount,
        currency: currency.to_string(),
        receipt_id: format!("rcpt_{nonce}"),
    }
}

fn sign_hex(secret: &str, data: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(data.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Checks the confirmation's signature: HMAC-SHA256 over
/// `"{gateway_order_id}|{payment_id}"`, hex-encoded, keyed by the webhook
/// secret. A confirmation that fails this check must never complete a
/// transaction.
pub fn verify_confirmation(secret: &str, confirmation: &GatewayConfirmation) -> bool {
    let payload = format!(
        "{}|{}",
        confirmation.gateway_order_id, confirmation.payment_id
    );
    let expected = sign_hex(secret, &payload);

    let got = confirmation.signature.as_bytes();
    let want = expected.as_bytes();
    if got.len() != want.len() {
        return false;
    }
    // constant-time compare
    got.iter().zip(want).fold(0u8, |acc, (a, b)| acc | (a ^ b)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test123secret456";

    fn signed_confirmation(secret: &str) -> GatewayConfirmation {
        let mut c = GatewayConfirmation {
            gateway_order_id: "order_4ad1".to_string(),
            payment_id: "pay_9bc2".to_string(),
            signature: String::new(),
        };
        c.signature = sign_hex(secret, &format!("{}|{}", c.gateway_order_id, c.payment_id));
        c
    }

    #[test]
    fn valid_signature_is_accepted() {
        let c = signed_confirmation(SECRET);
        assert!(verify_confirmation(SECRET, &c));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let c = signed_confirmation("some_other_secret");
        assert!(!verify_confirmation(SECRET, &c));
    }

    #[test]
    fn tampered_payment_id_is_rejected() {
        let mut c = signed_confirmation(SECRET);
        c.payment_id = "pay_forged".to_string();
        assert!(!verify_confirmation(SECRET, &c));
    }

    #[test]
    fn empty_signature_is_rejected() {
        let mut c = signed_confirmation(SECRET);
        c.signature.clear();
        assert!(!verify_confirmation(SECRET, &c));
    }

    #[test]
    fn intents_carry_unique_gateway_order_ids() {
        let a = create_charge_intent(500, "INR");
        let b = create_charge_intent(500, "INR");
        assert_ne!(a.gateway_order_id, b.gateway_order_id);
        assert!(a.gateway_order_id.starts_with("order_"));
        assert_eq!(a.amount, 500);
    }
}
