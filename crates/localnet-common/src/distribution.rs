//! Wallet funding distributions and the wallets decoded from them.
//!
//! A [`UtxoDistribution`] describes what the emulator should fund: each
//! wallet is a list of UTxO amounts (lovelace). The shape of the request
//! decides the shape of the result, so a `Keyed` distribution comes back as
//! named [`Wallets`].

use crate::keys::{KeyDecodeError, PrivateKey};
use std::collections::BTreeMap;

/// Initial UTxO amounts for one wallet.
pub type Amounts = Vec<u64>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UtxoDistribution {
    /// Exactly one wallet.
    Single(Amounts),
    /// One wallet per entry, positional.
    Many(Vec<Amounts>),
    /// One wallet per name. Keys are generated in name order.
    Keyed(BTreeMap<String, Amounts>),
}

impl UtxoDistribution {
    /// `count` wallets, each holding the same UTxOs.
    pub fn uniform(count: usize, amounts: Amounts) -> Self {
        UtxoDistribution::Many(vec![amounts; count])
    }

    pub fn wallet_count(&self) -> usize {
        match self {
            UtxoDistribution::Single(_) => 1,
            UtxoDistribution::Many(wallets) => wallets.len(),
            UtxoDistribution::Keyed(wallets) => wallets.len(),
        }
    }

    /// The `keysToGenerate` payload: one amount list per key, in the order
    /// keys will come back.
    pub fn keys_to_generate(&self) -> Vec<Amounts> {
        match self {
            UtxoDistribution::Single(amounts) => vec![amounts.clone()],
            UtxoDistribution::Many(wallets) => wallets.clone(),
            UtxoDistribution::Keyed(wallets) => wallets.values().cloned().collect(),
        }
    }

    /// Pair the emulator's keys with this distribution.
    pub fn decode_wallets(&self, private_keys: &[String]) -> Result<Wallets, KeyDecodeError> {
        let expected = self.wallet_count();
        if private_keys.len() != expected {
            return Err(KeyDecodeError::CountMismatch {
                expected,
                actual: private_keys.len(),
            });
        }

        let decode = |index: usize, amounts: &Amounts| -> Result<Wallet, KeyDecodeError> {
            let private_key = PrivateKey::from_cbor_hex(index, &private_keys[index])?;
            Ok(Wallet {
                private_key,
                utxo_amounts: amounts.clone(),
            })
        };

        match self {
            UtxoDistribution::Single(amounts) => Ok(Wallets::Single(decode(0, amounts)?)),
            UtxoDistribution::Many(wallets) => wallets
                .iter()
                .enumerate()
                .map(|(index, amounts)| decode(index, amounts))
                .collect::<Result<Vec<_>, _>>()
                .map(Wallets::Many),
            UtxoDistribution::Keyed(wallets) => wallets
                .iter()
                .enumerate()
                .map(|(index, (name, amounts))| {
                    decode(index, amounts).map(|wallet| (name.clone(), wallet))
                })
                .collect::<Result<BTreeMap<_, _>, _>>()
                .map(Wallets::Keyed),
        }
    }
}

/// A funded test wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wallet {
    pub private_key: PrivateKey,
    /// The amounts this wallet was funded with.
    pub utxo_amounts: Amounts,
}

impl Wallet {
    /// Sum of the funded amounts. Wide enough that no `u64` inputs overflow.
    pub fn initial_balance(&self) -> u128 {
        self.utxo_amounts.iter().map(|&amount| u128::from(amount)).sum()
    }
}

/// Wallets in the same shape as the distribution that produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Wallets {
    Single(Wallet),
    Many(Vec<Wallet>),
    Keyed(BTreeMap<String, Wallet>),
}

impl Wallets {
    pub fn len(&self) -> usize {
        match self {
            Wallets::Single(_) => 1,
            Wallets::Many(wallets) => wallets.len(),
            Wallets::Keyed(wallets) => wallets.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> Box<dyn Iterator<Item = &Wallet> + '_> {
        match self {
            Wallets::Single(wallet) => Box::new(std::iter::once(wallet)),
            Wallets::Many(wallets) => Box::new(wallets.iter()),
            Wallets::Keyed(wallets) => Box::new(wallets.values()),
        }
    }

    /// Look up a named wallet; only meaningful for `Keyed`.
    pub fn get(&self, name: &str) -> Option<&Wallet> {
        match self {
            Wallets::Keyed(wallets) => wallets.get(name),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_hex(byte: u8) -> String {
        PrivateKey::from_bytes([byte; 32]).to_cbor_hex()
    }

    #[test]
    fn many_distribution_decodes_positionally() {
        let dist = UtxoDistribution::Many(vec![vec![1_000, 2_000], vec![5_000]]);
        assert_eq!(dist.keys_to_generate(), vec![vec![1_000, 2_000], vec![5_000]]);

        let wallets = dist.decode_wallets(&[key_hex(1), key_hex(2)]).unwrap();
        assert_eq!(wallets.len(), 2);
        let collected: Vec<&Wallet> = wallets.iter().collect();
        assert_eq!(collected[0].private_key.as_bytes(), &[1; 32]);
        assert_eq!(collected[0].initial_balance(), 3_000);
        assert_eq!(collected[1].private_key.as_bytes(), &[2; 32]);
    }

    #[test]
    fn initial_balance_of_huge_utxos_does_not_overflow() {
        let wallet = Wallet {
            private_key: PrivateKey::from_bytes([1; 32]),
            utxo_amounts: vec![u64::MAX, u64::MAX],
        };
        assert_eq!(wallet.initial_balance(), 2 * u128::from(u64::MAX));
    }

    #[test]
    fn keyed_distribution_uses_name_order() {
        let mut map = BTreeMap::new();
        map.insert("carol".to_string(), vec![30]);
        map.insert("alice".to_string(), vec![10]);
        let dist = UtxoDistribution::Keyed(map);
        assert_eq!(dist.keys_to_generate(), vec![vec![10], vec![30]]);

        let wallets = dist.decode_wallets(&[key_hex(0xa), key_hex(0xc)]).unwrap();
        assert_eq!(wallets.get("alice").unwrap().private_key.as_bytes(), &[0xa; 32]);
        assert_eq!(wallets.get("carol").unwrap().utxo_amounts, vec![30]);
        assert!(wallets.get("bob").is_none());
    }

    #[test]
    fn single_distribution_yields_single_wallet() {
        let dist = UtxoDistribution::Single(vec![42]);
        let wallets = dist.decode_wallets(&[key_hex(9)]).unwrap();
        assert!(matches!(wallets, Wallets::Single(_)));
        assert_eq!(wallets.len(), 1);
    }

    #[test]
    fn key_count_mismatch_is_an_error() {
        let dist = UtxoDistribution::uniform(2, vec![100]);
        let err = dist.decode_wallets(&[key_hex(1)]).unwrap_err();
        assert!(matches!(
            err,
            KeyDecodeError::CountMismatch {
                expected: 2,
                actual: 1
            }
        ));
    }

    #[test]
    fn bad_key_reports_its_position() {
        let dist = UtxoDistribution::uniform(2, vec![100]);
        let err = dist
            .decode_wallets(&[key_hex(1), "not-hex".to_string()])
            .unwrap_err();
        assert!(matches!(err, KeyDecodeError::InvalidHex { index: 1, .. }));
    }
}
