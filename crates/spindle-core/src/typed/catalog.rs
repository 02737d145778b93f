//! LogicCatalog - 設定から参照されるロジックの名前表
//!
//! JSON 設定はコードを持てないので、`"logic": "add"` のように名前で
//! ロジックを指します。その名前を解決するのがこのカタログです。

use std::collections::HashMap;
use std::sync::Arc;

use super::logic::TaskLogic;
use crate::error::TaskError;

#[derive(Default, Clone)]
pub struct LogicCatalog {
    logic: HashMap<String, Arc<dyn TaskLogic>>,
}

impl LogicCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 二重登録はエラー
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        logic: Arc<dyn TaskLogic>,
    ) -> Result<(), TaskError> {
        let name = name.into();
        if self.logic.contains_key(&name) {
            return Err(TaskError::Configuration(format!(
                "logic '{name}' is already in the catalog"
            )));
        }
        self.logic.insert(name, logic);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskLogic>> {
        self.logic.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.logic.keys().cloned().collect();
        names.sort();
        names
    }
}
