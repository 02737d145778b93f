//! TaskLogic - タスク本体（呼び出し可能なロジック）
//!
//! # 二層構造
//! - **表層（Typed）**: `typed(|(x, y): (i64, i64)| Ok(x + y))` - 引数を型で受け取る
//! - **内部（Dyn）**: `TaskLogic` trait - object-safe, `Arc<dyn TaskLogic>` で保持
//!
//! どちらもワーカー側で `TaskArgs` を受け取り JSON 値を返します。

use std::fmt::Debug;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::domain::{TaskArgs, TaskFailure};

/// TaskLogic はタスク本体の object-safe な抽象化
#[async_trait]
pub trait TaskLogic: Send + Sync {
    async fn call(&self, args: TaskArgs) -> Result<Value, TaskFailure>;
}

struct FnLogic<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> TaskLogic for FnLogic<F>
where
    F: Fn(TaskArgs) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, TaskFailure>> + Send + 'static,
{
    async fn call(&self, args: TaskArgs) -> Result<Value, TaskFailure> {
        (self.f)(args).await
    }
}

/// Wrap an async closure that sees the raw arguments.
pub fn from_fn<F, Fut>(f: F) -> Arc<dyn TaskLogic>
where
    F: Fn(TaskArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, TaskFailure>> + Send + 'static,
{
    Arc::new(FnLogic { f })
}

struct TypedLogic<I, O, F> {
    f: F,
    _marker: PhantomData<fn(I) -> O>,
}

#[async_trait]
impl<I, O, F> TaskLogic for TypedLogic<I, O, F>
where
    I: DeserializeOwned + Send + 'static,
    O: Serialize + Debug + Send + 'static,
    F: Fn(I) -> Result<O, TaskFailure> + Send + Sync,
{
    async fn call(&self, args: TaskArgs) -> Result<Value, TaskFailure> {
        let input = decode_positional::<I>(args.args)?;
        let output = (self.f)(input)?;
        // JSON にできない値は Debug 表現で返す（保存時の文字列化と揃える）
        Ok(serde_json::to_value(&output).unwrap_or_else(|_| Value::String(format!("{output:?}"))))
    }
}

/// Wrap a synchronous function over decoded positional arguments.
///
/// The positional list is decoded as a whole first (tuples, `Vec<T>`); a
/// single argument may also be decoded on its own, and no arguments may
/// decode as `()`.
pub fn typed<I, O, F>(f: F) -> Arc<dyn TaskLogic>
where
    I: DeserializeOwned + Send + 'static,
    O: Serialize + Debug + Send + 'static,
    F: Fn(I) -> Result<O, TaskFailure> + Send + Sync + 'static,
{
    Arc::new(TypedLogic {
        f,
        _marker: PhantomData,
    })
}

fn decode_positional<I: DeserializeOwned>(mut args: Vec<Value>) -> Result<I, TaskFailure> {
    let whole = match serde_json::from_value::<I>(Value::Array(args.clone())) {
        Ok(input) => return Ok(input),
        Err(e) => e,
    };
    match args.len() {
        0 => serde_json::from_value::<I>(Value::Null)
            .map_err(|_| TaskFailure::new(format!("arguments: {whole}"))),
        1 => serde_json::from_value::<I>(args.remove(0))
            .map_err(|_| TaskFailure::new(format!("arguments: {whole}"))),
        _ => Err(TaskFailure::new(format!("arguments: {whole}"))),
    }
}
