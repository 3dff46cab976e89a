use super::{ChainError, TxIntent};
use alloy::consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy::eips::eip2718::Encodable2718;
use alloy::network::TxSignerSync;
use alloy::primitives::{Address, Bytes, TxKind};
use alloy::signers::local::PrivateKeySigner;

/// Turns an intent into raw transaction bytes ready for `eth_sendRawTransaction`.
pub trait IntentSigner: Send + Sync {
    fn address(&self) -> Address;

    fn sign(&self, intent: &TxIntent) -> Result<Bytes, ChainError>;
}

/// In-process secp256k1 key. Produces legacy (type 0) transactions.
pub struct LocalSigner {
    inner: PrivateKeySigner,
}

impl LocalSigner {
    /// Parse a hex private key, with or without `0x`.
    pub fn from_hex(key: &str) -> Result<Self, ChainError> {
        let inner: PrivateKeySigner = key
            .trim()
            .parse()
            .map_err(|e| ChainError::Signing(format!("invalid private key: {e}")))?;
        Ok(Self { inner })
    }
}

impl IntentSigner for LocalSigner {
    fn address(&self) -> Address {
        self.inner.address()
    }

    fn sign(&self, intent: &TxIntent) -> Result<Bytes, ChainError> {
        let mut tx = TxLegacy {
            chain_id: Some(intent.chain_id),
            nonce: intent.nonce,
            gas_price: intent.gas_price,
            gas_limit: intent.gas_limit,
            to: TxKind::Call(intent.recipient),
            value: intent.value,
            input: intent.payload.clone(),
        };

        let signature = self
            .inner
            .sign_transaction_sync(&mut tx)
            .map_err(|e| ChainError::Signing(e.to_string()))?;

        let envelope = TxEnvelope::from(tx.into_signed(signature));
        Ok(Bytes::from(envelope.encoded_2718()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::consensus::Transaction;
    use alloy::eips::eip2718::Decodable2718;
    use alloy::primitives::{address, U256};

    // Well-known development key (anvil account 0).
    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[test]
    fn test_address_from_key() {
        let signer = LocalSigner::from_hex(DEV_KEY).unwrap();
        assert_eq!(
            signer.address(),
            address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266")
        );
    }

    #[test]
    fn test_invalid_key_rejected() {
        assert!(matches!(
            LocalSigner::from_hex("not-a-key"),
            Err(ChainError::Signing(_))
        ));
    }

    #[test]
    fn test_signed_bytes_carry_intent_fields() {
        let signer = LocalSigner::from_hex(DEV_KEY).unwrap();
        let me = signer.address();
        let intent = TxIntent {
            nonce: 7,
            chain_id: 1088,
            sender: me,
            recipient: me,
            payload: Bytes::new(),
            gas_price: 1_000_000_000,
            gas_limit: 21_000,
            value: U256::ZERO,
        };

        let raw = signer.sign(&intent).unwrap();
        let envelope = TxEnvelope::decode_2718(&mut &raw[..]).unwrap();

        assert!(envelope.is_legacy());
        assert_eq!(Transaction::nonce(&envelope), 7);
        assert_eq!(Transaction::gas_limit(&envelope), 21_000);
        assert_eq!(Transaction::chain_id(&envelope), Some(1088));
        assert_eq!(Transaction::to(&envelope), Some(me));
    }
}
