//! Addresses of resource instances, providers and deposed objects.
//!
//! Addresses are immutable values used as map keys throughout the engine.
//! Every address type has a canonical textual form produced by `Display` and
//! accepted by `FromStr`, and serializes as that string.
//!
//! ```text
//! aws_instance.web
//! module.net["a"].aws_subnet.private[0]
//! data.aws_ami.ubuntu
//! ephemeral.random_password.db
//! provider["registry.example.com/hashicorp/aws"].east
//! ```

use crate::errors::AddrParseError;
use nutype::nutype;
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// A validated identifier used for module calls, resource names and
/// provider aliases.
#[nutype(
    validate(predicate = |name: &str| is_identifier(name)),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct Name(String);

impl Name {
    /// Parses a name, mapping validation failures into [`AddrParseError`].
    pub fn parse(name: &str) -> Result<Self, AddrParseError> {
        Self::try_new(name.to_string()).map_err(|_| AddrParseError::InvalidName(name.to_string()))
    }
}

/// The key distinguishing instances of a resource or module using `count`
/// or `for_each`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum InstanceKey {
    /// A single-instance object.
    #[default]
    None,
    /// An instance created by `count`.
    Int(i64),
    /// An instance created by `for_each`.
    Str(String),
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => Ok(()),
            Self::Int(i) => write!(f, "[{i}]"),
            Self::Str(s) => {
                f.write_str("[\"")?;
                for c in s.chars() {
                    if c == '"' || c == '\\' {
                        f.write_str("\\")?;
                    }
                    write!(f, "{c}")?;
                }
                f.write_str("\"]")
            }
        }
    }
}

/// One step of a module instance path: `module.<name><key>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModuleStep {
    /// The module call name
    pub name: Name,
    /// The module instance key
    pub key: InstanceKey,
}

/// A path of module instances from the root module. Empty for the root.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ModuleInstance(Vec<ModuleStep>);

impl ModuleInstance {
    /// The root module.
    pub const fn root() -> Self {
        Self(Vec::new())
    }

    /// Returns true for the root module.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the path extended by one more module call.
    #[must_use]
    pub fn child(&self, name: Name, key: InstanceKey) -> Self {
        let mut steps = self.0.clone();
        steps.push(ModuleStep { name, key });
        Self(steps)
    }

    /// The steps from the root module.
    pub fn steps(&self) -> &[ModuleStep] {
        &self.0
    }
}

impl fmt::Display for ModuleInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, step) in self.0.iter().enumerate() {
            if idx != 0 {
                f.write_str(".")?;
            }
            write!(f, "module.{}{}", step.name, step.key)?;
        }
        Ok(())
    }
}

/// The three modes a resource can be declared in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceMode {
    /// A resource whose lifecycle the orchestrator manages.
    Managed,
    /// A data source, read but never changed.
    Data,
    /// A resource that lives only for the duration of one run.
    Ephemeral,
}

impl ResourceMode {
    const fn prefix(self) -> &'static str {
        match self {
            Self::Managed => "",
            Self::Data => "data.",
            Self::Ephemeral => "ephemeral.",
        }
    }
}

impl fmt::Display for ResourceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Managed => "managed",
            Self::Data => "data",
            Self::Ephemeral => "ephemeral",
        })
    }
}

/// The absolute address of one resource instance.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceInstanceAddr {
    /// The module instance containing the resource
    pub module: ModuleInstance,
    /// The resource mode
    pub mode: ResourceMode,
    /// The resource type name, such as `aws_instance`
    pub resource_type: String,
    /// The resource name
    pub name: Name,
    /// The instance key
    pub key: InstanceKey,
}

impl ResourceInstanceAddr {
    /// A single-instance resource in the root module.
    pub fn new(mode: ResourceMode, resource_type: &str, name: &str) -> Result<Self, AddrParseError> {
        if !is_identifier(resource_type) {
            return Err(AddrParseError::InvalidName(resource_type.to_string()));
        }
        Ok(Self {
            module: ModuleInstance::root(),
            mode,
            resource_type: resource_type.to_string(),
            name: Name::parse(name)?,
            key: InstanceKey::None,
        })
    }

    /// The same resource with a different instance key.
    #[must_use]
    pub fn with_key(mut self, key: InstanceKey) -> Self {
        self.key = key;
        self
    }

    /// The same resource placed in a different module instance.
    #[must_use]
    pub fn in_module(mut self, module: ModuleInstance) -> Self {
        self.module = module;
        self
    }
}

impl fmt::Display for ResourceInstanceAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.module.is_root() {
            write!(f, "{}.", self.module)?;
        }
        write!(
            f,
            "{}{}.{}{}",
            self.mode.prefix(),
            self.resource_type,
            self.name,
            self.key
        )
    }
}

impl FromStr for ResourceInstanceAddr {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut p = Parser::new(s);
        let module = p.module_path()?;
        let mode = if p.eat("data.") {
            ResourceMode::Data
        } else if p.eat("ephemeral.") {
            ResourceMode::Ephemeral
        } else {
            ResourceMode::Managed
        };
        let resource_type = p.identifier("a resource type")?;
        p.expect('.', "'.' after the resource type")?;
        let name = Name::parse(p.identifier("a resource name")?)?;
        let key = p.instance_key()?;
        p.finish()?;
        Ok(Self {
            module,
            mode,
            resource_type: resource_type.to_string(),
            name,
            key,
        })
    }
}

/// The source address of a provider: `hostname/namespace/type`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProviderAddr {
    /// Registry hostname
    pub hostname: String,
    /// Registry namespace
    pub namespace: String,
    /// Provider type, such as `aws`
    pub type_name: String,
}

impl ProviderAddr {
    /// Creates a provider address from its three parts.
    pub fn new(hostname: &str, namespace: &str, type_name: &str) -> Self {
        Self {
            hostname: hostname.to_string(),
            namespace: namespace.to_string(),
            type_name: type_name.to_string(),
        }
    }
}

impl fmt::Display for ProviderAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.hostname, self.namespace, self.type_name)
    }
}

impl FromStr for ProviderAddr {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            [hostname, namespace, type_name]
                if !hostname.is_empty()
                    && !namespace.is_empty()
                    && is_identifier(type_name)
                    && !s.contains(['"', '\\']) =>
            {
                Ok(Self::new(hostname, namespace, type_name))
            }
            _ => Err(AddrParseError::InvalidProvider(s.to_string())),
        }
    }
}

/// The absolute address of one configured instance of a provider.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProviderInstanceAddr {
    /// The module instance declaring the provider configuration
    pub module: ModuleInstance,
    /// The provider
    pub provider: ProviderAddr,
    /// Optional configuration alias
    pub alias: Option<Name>,
    /// Instance key for configurations using `for_each`
    pub key: InstanceKey,
}

impl ProviderInstanceAddr {
    /// The default (unaliased) configuration of a provider in the root module.
    pub const fn root(provider: ProviderAddr) -> Self {
        Self {
            module: ModuleInstance::root(),
            provider,
            alias: None,
            key: InstanceKey::None,
        }
    }

    /// The same provider configuration with an alias.
    #[must_use]
    pub fn with_alias(mut self, alias: Name) -> Self {
        self.alias = Some(alias);
        self
    }
}

impl fmt::Display for ProviderInstanceAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.module.is_root() {
            write!(f, "{}.", self.module)?;
        }
        write!(f, "provider[\"{}\"]", self.provider)?;
        if let Some(alias) = &self.alias {
            write!(f, ".{alias}")?;
        }
        write!(f, "{}", self.key)
    }
}

impl FromStr for ProviderInstanceAddr {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut p = Parser::new(s);
        let module = p.module_path()?;
        if !p.eat("provider[") {
            return Err(p.unexpected("provider[\"...\"]"));
        }
        let source = p.quoted_string()?;
        p.expect(']', "']' after the provider source address")?;
        let provider = source.parse()?;
        let alias = if p.eat(".") {
            Some(Name::parse(p.identifier("a provider alias")?)?)
        } else {
            None
        };
        let key = p.instance_key()?;
        p.finish()?;
        Ok(Self {
            module,
            provider,
            alias,
            key,
        })
    }
}

/// Identifies one deposed object of a resource instance.
///
/// [`DeposedKey::NOT_DEPOSED`] stands for the current object. Deposed keys
/// render as eight hexadecimal digits; the current object renders as an
/// empty string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DeposedKey(Option<u32>);

impl DeposedKey {
    /// The sentinel for "the current object, not a deposed one".
    pub const NOT_DEPOSED: Self = Self(None);

    /// A deposed key with a specific value.
    pub const fn new(key: u32) -> Self {
        Self(Some(key))
    }

    /// A random deposed key.
    pub fn random() -> Self {
        Self(Some(rand::rng().random()))
    }

    /// Returns true unless this is [`DeposedKey::NOT_DEPOSED`].
    pub const fn is_deposed(self) -> bool {
        self.0.is_some()
    }
}

impl fmt::Display for DeposedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(key) => write!(f, "{key:08x}"),
            None => Ok(()),
        }
    }
}

impl FromStr for DeposedKey {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Self::NOT_DEPOSED);
        }
        if s.len() != 8 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AddrParseError::InvalidDeposedKey(s.to_string()));
        }
        u32::from_str_radix(s, 16)
            .map(Self::new)
            .map_err(|_| AddrParseError::InvalidDeposedKey(s.to_string()))
    }
}

/// Renders an object label for messages: the address, plus the deposed key
/// when the object is not current.
pub fn object_label(addr: &ResourceInstanceAddr, key: DeposedKey) -> String {
    if key.is_deposed() {
        format!("{addr} deposed object {key}")
    } else {
        addr.to_string()
    }
}

macro_rules! string_serde {
    ($($ty:ty),*) => {$(
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    )*};
}

string_serde!(ResourceInstanceAddr, ProviderAddr, ProviderInstanceAddr, DeposedKey);

/// Hand-written recursive-descent parser shared by the address types.
struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    const fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, literal: &str) -> bool {
        if self.rest().starts_with(literal) {
            self.pos += literal.len();
            true
        } else {
            false
        }
    }

    fn unexpected(&self, expected: &'static str) -> AddrParseError {
        match self.peek() {
            Some(found) => AddrParseError::Unexpected {
                input: self.input.to_string(),
                offset: self.pos,
                found,
                expected,
            },
            None => AddrParseError::UnexpectedEnd {
                input: self.input.to_string(),
                expected,
            },
        }
    }

    fn expect(&mut self, c: char, expected: &'static str) -> Result<(), AddrParseError> {
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            Ok(())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn finish(&self) -> Result<(), AddrParseError> {
        if self.pos == self.input.len() {
            Ok(())
        } else {
            Err(self.unexpected("end of address"))
        }
    }

    fn identifier(&mut self, expected: &'static str) -> Result<&'a str, AddrParseError> {
        let rest = self.rest();
        let len = rest
            .char_indices()
            .find(|&(idx, c)| {
                !(c.is_ascii_alphabetic() || c == '_' || (idx > 0 && (c.is_ascii_digit() || c == '-')))
            })
            .map_or(rest.len(), |(idx, _)| idx);
        if len == 0 {
            return Err(self.unexpected(expected));
        }
        self.pos += len;
        Ok(&rest[..len])
    }

    fn module_path(&mut self) -> Result<ModuleInstance, AddrParseError> {
        let mut module = ModuleInstance::root();
        while self.eat("module.") {
            let name = Name::parse(self.identifier("a module name")?)?;
            let key = self.instance_key()?;
            self.expect('.', "'.' after the module call")?;
            module = module.child(name, key);
        }
        Ok(module)
    }

    fn quoted_string(&mut self) -> Result<String, AddrParseError> {
        self.expect('"', "'\"'")?;
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(out),
                Some('\\') => match self.bump() {
                    Some(c @ ('"' | '\\')) => out.push(c),
                    _ => {
                        return Err(AddrParseError::InvalidKey {
                            input: self.input.to_string(),
                            reason: "only \\\" and \\\\ escapes are supported".to_string(),
                        })
                    }
                },
                Some(c) => out.push(c),
                None => return Err(self.unexpected("closing '\"'")),
            }
        }
    }

    fn instance_key(&mut self) -> Result<InstanceKey, AddrParseError> {
        if self.peek() != Some('[') {
            return Ok(InstanceKey::None);
        }
        self.pos += 1;
        let key = if self.peek() == Some('"') {
            InstanceKey::Str(self.quoted_string()?)
        } else {
            let rest = self.rest();
            let len = rest
                .char_indices()
                .find(|&(idx, c)| !(c.is_ascii_digit() || (idx == 0 && c == '-')))
                .map_or(rest.len(), |(idx, _)| idx);
            let digits = &rest[..len];
            let value = digits.parse::<i64>().map_err(|e| AddrParseError::InvalidKey {
                input: self.input.to_string(),
                reason: format!("{digits:?} is not an integer or quoted string: {e}"),
            })?;
            self.pos += len;
            InstanceKey::Int(value)
        };
        self.expect(']', "']' after the instance key")?;
        Ok(key)
    }
}
