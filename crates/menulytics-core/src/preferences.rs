use anyhow::Result;

use crate::storage::{get_json, set_json, KeyValueStore};

pub const LANGUAGE_KEY: &str = "menu_language";

/// The menu language the customer picked, if any.
pub async fn get_language(store: &dyn KeyValueStore) -> Result<Option<String>> {
    Ok(get_json::<String>(store, LANGUAGE_KEY)
        .await?
        .filter(|lang| !lang.trim().is_empty()))
}

pub async fn set_language(store: &dyn KeyValueStore, language: &str) -> Result<()> {
    set_json(store, LANGUAGE_KEY, language.trim()).await
}
