use crate::amount::TokenAmount;
use crate::chain::{Provider, Receipt, TokenContract, TxHandle};
use crate::error::{ensure, EngineError, ErrorCode};
use crate::primitives::Address;
use log::*;

/// Waits for a submitted transaction to be mined, failing with `code` if its receipt reports failure.
pub async fn assert_tx<P: Provider + ?Sized>(
    provider: &P,
    label: &str,
    code: ErrorCode,
    tx: TxHandle,
) -> Result<Receipt, EngineError> {
    info!("[{label}] sent: {}", tx.hash);
    let receipt = provider.wait_for_transaction(tx.hash).await?;
    if !receipt.status {
        warn!("[{label}] transaction {} failed in block {}", receipt.transaction_hash, receipt.block_number);
        return Err(EngineError::TxFailed { code, label: label.to_string(), tx_hash: tx.hash });
    }
    info!("[{label}] mined in block {}: {}", receipt.block_number, receipt.transaction_hash);
    Ok(receipt)
}

/// An allowance that must be in place before `spender` can pull `amount` of `token` from the account.
#[derive(Clone, Copy, Debug)]
pub struct Approval {
    pub token: Address,
    pub spender: Address,
    pub amount: TokenAmount,
    /// Approvals are never smaller than this, to save approving again on every deposit.
    pub minimum_allowance: TokenAmount,
}

/// Checks the token balance covers `approval.amount`, and approves the spender first if the current allowance does
/// not. Returns the approval receipt, or `None` if the allowance already sufficed.
pub async fn approve_if_needed<C: TokenContract + Provider + ?Sized>(
    chain: &C,
    balance: TokenAmount,
    allowance: TokenAmount,
    approval: Approval,
) -> Result<Option<Receipt>, EngineError> {
    ensure(
        balance >= approval.amount,
        ErrorCode::InsufficientBalance,
        [("current", balance), ("required", approval.amount)],
    )?;
    if allowance >= approval.amount {
        return Ok(None);
    }
    let amount = approval.amount.max(approval.minimum_allowance);
    debug!("Allowance {allowance} is short of {}. Approving {amount} for {}", approval.amount, approval.spender);
    let tx = chain.approve(approval.token, approval.spender, amount).await?;
    let receipt = assert_tx(chain, "approve", ErrorCode::ApproveTransactionFailed, tx).await?;
    Ok(Some(receipt))
}
