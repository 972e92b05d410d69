//! `pgstack logs` command - stream stack logs

use super::{exit, Context};
use anyhow::{Context as _, Result};

/// Stream logs of every service in a stack.
pub async fn logs(ctx: &Context, stack_id: &str, follow: bool, tail: Option<u32>) -> Result<u8> {
    ctx.controller
        .logs(stack_id, follow, tail)
        .await
        .with_context(|| format!("Failed to read logs of stack '{}'", stack_id))?;
    Ok(exit::OK)
}
