use log::debug;

use std::collections::HashMap;

use super::chain::{Blockchain, BlockchainError};
use super::transaction::{Transaction, TxOutput};

/// A transaction reached by the walk together with its still-unspent output
/// indices for the queried owner
struct UnspentEntry {
    tx: Transaction,
    unspent_outs: Vec<usize>,
}

impl Blockchain {
    /// The single backward walk every UTXO query is built on.
    ///
    /// Spends are recorded incrementally as the walk proceeds from the tip,
    /// so an input is registered before the transaction defining the output
    /// it spends is visited; each output is therefore checked against the
    /// spent-set first. Coinbase inputs reference nothing real and are
    /// skipped.
    fn walk_unspent(&self, pub_key_hash: &[u8]) -> Result<Vec<UnspentEntry>, BlockchainError> {
        let mut unspent = Vec::new();
        let mut spent: HashMap<Vec<u8>, Vec<i32>> = HashMap::new();

        for block in self.iterator() {
            let block = block?;

            for tx in &block.transactions {
                let mut unspent_outs = Vec::new();

                for (out_idx, out) in tx.outputs.iter().enumerate() {
                    if let Some(spent_outs) = spent.get(&tx.id) {
                        if spent_outs.contains(&(out_idx as i32)) {
                            continue;
                        }
                    }
                    if out.is_locked_with_key(pub_key_hash) {
                        unspent_outs.push(out_idx);
                    }
                }

                if !unspent_outs.is_empty() {
                    unspent.push(UnspentEntry {
                        tx: tx.clone(),
                        unspent_outs,
                    });
                }

                if !tx.is_coinbase() {
                    for input in &tx.inputs {
                        if input.uses_key(pub_key_hash) {
                            spent
                                .entry(input.prev_tx_id.clone())
                                .or_default()
                                .push(input.out_index);
                        }
                    }
                }
            }
        }

        Ok(unspent)
    }

    /// Transactions holding at least one unspent output locked to the owner;
    /// each transaction appears once
    pub fn find_unspent_transactions(
        &self,
        pub_key_hash: &[u8],
    ) -> Result<Vec<Transaction>, BlockchainError> {
        Ok(self
            .walk_unspent(pub_key_hash)?
            .into_iter()
            .map(|entry| entry.tx)
            .collect())
    }

    /// Exactly the unspent outputs locked to the owner
    pub fn find_utxos(&self, pub_key_hash: &[u8]) -> Result<Vec<TxOutput>, BlockchainError> {
        let mut utxos = Vec::new();

        for entry in self.walk_unspent(pub_key_hash)? {
            for out_idx in entry.unspent_outs {
                utxos.push(entry.tx.outputs[out_idx].clone());
            }
        }

        Ok(utxos)
    }

    /// Greedy first-fit selection in chain-traversal order, stopping as soon
    /// as the requested amount is covered. Returns the accumulated value and
    /// the selected output indices per transaction.
    pub fn find_spendable_outputs(
        &self,
        pub_key_hash: &[u8],
        amount: u64,
    ) -> Result<(u64, HashMap<Vec<u8>, Vec<usize>>), BlockchainError> {
        let mut spendable: HashMap<Vec<u8>, Vec<usize>> = HashMap::new();
        let mut accumulated: u64 = 0;

        'walk: for entry in self.walk_unspent(pub_key_hash)? {
            for out_idx in entry.unspent_outs {
                if accumulated < amount {
                    accumulated += entry.tx.outputs[out_idx].value;
                    spendable
                        .entry(entry.tx.id.clone())
                        .or_default()
                        .push(out_idx);

                    if accumulated >= amount {
                        break 'walk;
                    }
                }
            }
        }

        debug!("accumulated {} towards requested {}", accumulated, amount);

        Ok((accumulated, spendable))
    }

    /// Sum of the owner's unspent output values
    pub fn balance(&self, pub_key_hash: &[u8]) -> Result<u64, BlockchainError> {
        Ok(self
            .find_utxos(pub_key_hash)?
            .iter()
            .map(|out| out.value)
            .sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::crypto::Wallet;
    use crate::blockchain::storage::BlockStore;
    use crate::blockchain::transaction::{TransactionError, SUBSIDY};

    fn fresh_chain(wallet: &Wallet) -> Blockchain {
        let store = BlockStore::temporary().unwrap();
        Blockchain::init(store, wallet.address()).unwrap()
    }

    #[test]
    fn test_genesis_utxo_set() {
        let a = Wallet::new();
        let chain = fresh_chain(&a);

        let utxos = chain.find_utxos(&a.pub_key_hash()).unwrap();
        assert_eq!(utxos.len(), 1);
        assert_eq!(utxos[0].value, SUBSIDY);
        assert_eq!(chain.balance(&a.pub_key_hash()).unwrap(), SUBSIDY);
    }

    #[test]
    fn test_payment_moves_value_and_spends_source() {
        let a = Wallet::new();
        let b = Wallet::new();
        let mut chain = fresh_chain(&a);

        let tx = Transaction::build_payment(&a, b.address(), 30, &chain).unwrap();
        chain.add_block(vec![tx]).unwrap();

        assert_eq!(chain.balance(&a.pub_key_hash()).unwrap(), 70);
        assert_eq!(chain.balance(&b.pub_key_hash()).unwrap(), 30);

        // The original subsidy output no longer appears in A's UTXO set
        let utxos = chain.find_utxos(&a.pub_key_hash()).unwrap();
        assert_eq!(utxos.len(), 1);
        assert_eq!(utxos[0].value, 70);
    }

    #[test]
    fn test_insufficient_funds_is_typed_and_builds_nothing() {
        let a = Wallet::new();
        let b = Wallet::new();
        let mut chain = fresh_chain(&a);

        let tx = Transaction::build_payment(&a, b.address(), 30, &chain).unwrap();
        chain.add_block(vec![tx]).unwrap();

        let err = Transaction::build_payment(&a, b.address(), 1000, &chain).unwrap_err();
        match err {
            BlockchainError::TransactionError(TransactionError::InsufficientFunds {
                requested,
                accumulated,
            }) => {
                assert_eq!(requested, 1000);
                assert_eq!(accumulated, 70);
            }
            other => panic!("unexpected error: {other}"),
        }

        // The failed attempt left the chain untouched
        assert_eq!(chain.blocks().unwrap().len(), 2);
        assert_eq!(chain.balance(&a.pub_key_hash()).unwrap(), 70);
    }

    #[test]
    fn test_built_payment_verifies_and_tampered_copy_does_not() {
        let a = Wallet::new();
        let b = Wallet::new();
        let chain = fresh_chain(&a);

        let tx = Transaction::build_payment(&a, b.address(), 30, &chain).unwrap();
        assert!(chain.verify_transaction(&tx).unwrap());

        let mut forged = tx.clone();
        forged.inputs[0].signature[0] ^= 0xff;
        assert!(!chain.verify_transaction(&forged).unwrap());
    }

    #[test]
    fn test_spend_exclusivity_with_partially_spent_transaction() {
        let a = Wallet::new();
        let b = Wallet::new();
        let mut chain = fresh_chain(&a);

        // First payment leaves a change output of 70 to A in a transaction
        // that also pays 30 to B
        let tx = Transaction::build_payment(&a, b.address(), 30, &chain).unwrap();
        chain.add_block(vec![tx]).unwrap();

        // Spending the change output must not resurrect anything else from
        // its transaction, nor linger in A's set itself
        let tx = Transaction::build_payment(&a, b.address(), 50, &chain).unwrap();
        chain.add_block(vec![tx]).unwrap();

        let a_utxos = chain.find_utxos(&a.pub_key_hash()).unwrap();
        assert_eq!(a_utxos.len(), 1);
        assert_eq!(a_utxos[0].value, 20);
        assert_eq!(chain.balance(&a.pub_key_hash()).unwrap(), 20);

        let b_values: Vec<u64> = chain
            .find_utxos(&b.pub_key_hash())
            .unwrap()
            .iter()
            .map(|out| out.value)
            .collect();
        assert_eq!(b_values.iter().sum::<u64>(), 80);
        assert!(b_values.contains(&30));
        assert!(b_values.contains(&50));
    }

    #[test]
    fn test_spendable_outputs_stop_early() {
        let a = Wallet::new();
        let chain = fresh_chain(&a);

        let (accumulated, spendable) = chain
            .find_spendable_outputs(&a.pub_key_hash(), 10)
            .unwrap();

        assert_eq!(accumulated, SUBSIDY);
        assert_eq!(spendable.len(), 1);

        let (accumulated, spendable) = chain
            .find_spendable_outputs(&a.pub_key_hash(), SUBSIDY + 1)
            .unwrap();
        assert_eq!(accumulated, SUBSIDY);
        assert_eq!(spendable.len(), 1);
    }

    #[test]
    fn test_unspent_transactions_listed_once() {
        let a = Wallet::new();
        let chain = fresh_chain(&a);

        let unspent = chain.find_unspent_transactions(&a.pub_key_hash()).unwrap();
        assert_eq!(unspent.len(), 1);
        assert!(unspent[0].is_coinbase());
    }
}
