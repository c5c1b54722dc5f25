use anyhow::Result;

use crate::models::{Id, Security};

use super::Storage;

/// Resolve a security by id, falling back to a case-insensitive symbol match.
pub async fn find_security(storage: &dyn Storage, id_or_symbol: &str) -> Result<Option<Security>> {
    if Id::is_path_safe(id_or_symbol) {
        let id = Id::from_string(id_or_symbol);
        if let Some(security) = storage.get_security(&id).await? {
            return Ok(Some(security));
        }
    }

    let mut matches: Vec<Security> = storage
        .list_securities()
        .await?
        .into_iter()
        .filter(|s| s.symbol.eq_ignore_ascii_case(id_or_symbol))
        .collect();

    if matches.len() > 1 {
        let ids: Vec<String> = matches.iter().map(|s| s.id.to_string()).collect();
        anyhow::bail!("Multiple securities with symbol '{id_or_symbol}'. Use an ID instead: {ids:?}");
    }

    Ok(matches.pop())
}
