//! 按类型解析协作者的依赖注册表。
//!
//! # 教案式注释
//!
//! ## 意图 (Why)
//! - 请求处理代码需要拿到会话存储、数据库代理、当前请求等协作者，但不应关心它们由谁创建；
//! - 以 `TypeId` 为键的显式注册表取代运行期反射：组合阶段注册全局提供者，
//!   任务内部再叠加一层按任务作用域的缓存。
//!
//! ## 逻辑 (How)
//! - [`TypeMap`] 以 `TypeId::of::<Rc<T>>()` 为键保存 `Rc<T>`，`T` 可以是 trait 对象；
//! - [`Resolver::require`] 依次查找：任务本地缓存 → 运行时提供者（命中后提升进本地缓存）
//!   → [`Injectable::inject`] 递归构造；
//! - 构造栈记录正在构造的类型，重复进入即报告循环依赖。
//!
//! ## 契约 (What)
//! - 失败以 [`Unresolvable`] 值返回，不会 panic；
//! - 通过构造得到的实例不会写入任何缓存，每次解析都会重新构造。

use crate::error::{Unresolvable, UnresolvableReason};
use core::fmt;
use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::rc::Rc;

/// 以类型为键的共享实例表。
///
/// 克隆只复制 `Rc` 句柄，两张表共享同一批实例。
#[derive(Clone, Default)]
pub struct TypeMap {
    entries: HashMap<TypeId, Rc<dyn Any>>,
}

impl TypeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册实例，返回被覆盖的旧实例。
    pub fn insert<T: ?Sized + 'static>(&mut self, value: Rc<T>) -> Option<Rc<T>> {
        self.entries
            .insert(TypeId::of::<Rc<T>>(), Rc::new(value))
            .and_then(|old| old.downcast::<Rc<T>>().ok())
            .map(|old| Rc::clone(&*old))
    }

    pub fn get<T: ?Sized + 'static>(&self) -> Option<Rc<T>> {
        self.entries
            .get(&TypeId::of::<Rc<T>>())
            .and_then(|value| value.downcast_ref::<Rc<T>>())
            .cloned()
    }

    pub fn remove<T: ?Sized + 'static>(&mut self) -> Option<Rc<T>> {
        self.entries
            .remove(&TypeId::of::<Rc<T>>())
            .and_then(|old| old.downcast::<Rc<T>>().ok())
            .map(|old| Rc::clone(&*old))
    }

    pub fn contains<T: ?Sized + 'static>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<Rc<T>>())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn insert_erased(&mut self, key: TypeId, value: Box<dyn Any>) {
        self.entries.insert(key, Rc::from(value));
    }
}

impl fmt::Debug for TypeMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeMap").field("len", &self.entries.len()).finish()
    }
}

/// 可以由解析器递归构造的类型。
///
/// 实现方在 `inject` 中通过 `resolver` 取得自己的构造参数；
/// 可选参数使用 [`Resolver::optional`] 并自行提供默认值。
pub trait Injectable: Sized + 'static {
    fn inject(resolver: &mut Resolver<'_>) -> Result<Self, Unresolvable>;
}

/// 一次解析过程的上下文。
pub struct Resolver<'a> {
    local: &'a TypeMap,
    providers: &'a TypeMap,
    stack: Vec<TypeId>,
    promoted: Vec<(TypeId, Box<dyn Any>)>,
}

impl<'a> Resolver<'a> {
    pub fn new(local: &'a TypeMap, providers: &'a TypeMap) -> Self {
        Self {
            local,
            providers,
            stack: Vec::new(),
            promoted: Vec::new(),
        }
    }

    /// 只在已注册实例中查找，适用于 trait 对象等无法构造的类型。
    pub fn lookup<T: ?Sized + 'static>(&mut self) -> Result<Rc<T>, Unresolvable> {
        if let Some(found) = self.local.get::<T>() {
            return Ok(found);
        }
        if let Some(found) = self.providers.get::<T>() {
            self.promoted
                .push((TypeId::of::<Rc<T>>(), Box::new(Rc::clone(&found))));
            return Ok(found);
        }
        Err(Unresolvable {
            type_name: type_name::<T>(),
            reason: UnresolvableReason::Missing,
        })
    }

    /// 查找或构造 `T`。
    pub fn require<T: Injectable>(&mut self) -> Result<Rc<T>, Unresolvable> {
        if let Ok(found) = self.lookup::<T>() {
            return Ok(found);
        }
        let key = TypeId::of::<T>();
        if self.stack.contains(&key) {
            return Err(Unresolvable {
                type_name: type_name::<T>(),
                reason: UnresolvableReason::Cycle,
            });
        }
        self.stack.push(key);
        let built = T::inject(self);
        self.stack.pop();
        built.map(Rc::new)
    }

    /// 可选依赖：缺失时返回 `None`，循环依赖仍然作为错误返回。
    pub fn optional<T: Injectable>(&mut self) -> Result<Option<Rc<T>>, Unresolvable> {
        match self.require::<T>() {
            Ok(found) => Ok(Some(found)),
            Err(err) if err.reason == UnresolvableReason::Missing => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// 结束解析，交出从运行时提供者处命中、需要写入任务缓存的实例。
    pub(crate) fn into_promoted(self) -> Promoted {
        Promoted(self.promoted)
    }
}

/// 待写入任务本地缓存的提供者实例。
pub(crate) struct Promoted(Vec<(TypeId, Box<dyn Any>)>);

impl Promoted {
    pub(crate) fn apply(self, local: &mut TypeMap) {
        for (key, value) in self.0 {
            local.insert_erased(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Greeter {
        fn greet(&self) -> String;
    }

    struct English;

    impl Greeter for English {
        fn greet(&self) -> String {
            "hello".into()
        }
    }

    #[derive(Debug)]
    struct Settings {
        retries: u32,
    }

    impl Injectable for Settings {
        fn inject(_: &mut Resolver<'_>) -> Result<Self, Unresolvable> {
            Ok(Self { retries: 3 })
        }
    }

    struct Service {
        settings: Rc<Settings>,
        greeter: Rc<dyn Greeter>,
    }

    impl Injectable for Service {
        fn inject(resolver: &mut Resolver<'_>) -> Result<Self, Unresolvable> {
            Ok(Self {
                settings: resolver.require::<Settings>()?,
                greeter: resolver.lookup::<dyn Greeter>()?,
            })
        }
    }

    struct Left;
    struct Right;

    impl Injectable for Left {
        fn inject(resolver: &mut Resolver<'_>) -> Result<Self, Unresolvable> {
            resolver.require::<Right>()?;
            Ok(Left)
        }
    }

    impl Injectable for Right {
        fn inject(resolver: &mut Resolver<'_>) -> Result<Self, Unresolvable> {
            resolver.require::<Left>()?;
            Ok(Right)
        }
    }

    #[test]
    fn builds_from_defaults_and_providers() {
        let local = TypeMap::new();
        let mut providers = TypeMap::new();
        providers.insert::<dyn Greeter>(Rc::new(English));

        let mut resolver = Resolver::new(&local, &providers);
        let service = resolver.require::<Service>().unwrap();
        assert_eq!(service.settings.retries, 3);
        assert_eq!(service.greeter.greet(), "hello");

        let mut cache = TypeMap::new();
        resolver.into_promoted().apply(&mut cache);
        assert!(cache.contains::<dyn Greeter>());
        assert!(!cache.contains::<Service>());
    }

    #[test]
    fn missing_provider_is_a_value_not_a_panic() {
        let empty = TypeMap::new();
        let mut resolver = Resolver::new(&empty, &empty);
        let err = resolver.require::<Service>().err().unwrap();
        assert_eq!(err.reason, UnresolvableReason::Missing);
        assert!(err.type_name.contains("Greeter"));
    }

    #[test]
    fn local_cache_wins_over_providers() {
        let mut local = TypeMap::new();
        local.insert(Rc::new(Settings { retries: 9 }));
        let mut providers = TypeMap::new();
        providers.insert(Rc::new(Settings { retries: 1 }));
        let mut resolver = Resolver::new(&local, &providers);
        assert_eq!(resolver.require::<Settings>().unwrap().retries, 9);
    }

    #[test]
    fn cycles_are_reported() {
        let empty = TypeMap::new();
        let mut resolver = Resolver::new(&empty, &empty);
        let err = resolver.require::<Left>().err().unwrap();
        assert_eq!(err.reason, UnresolvableReason::Cycle);
        assert_eq!(resolver.optional::<Left>().err().unwrap().reason, UnresolvableReason::Cycle);
    }
}
