use serde_json::Value;

/// How a field's value is encoded on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncodingKind {
    Int,
    Float,
    Str,
    Bool,
    Buffer,
    #[default]
    Json,
}

impl EncodingKind {
    pub fn name(&self) -> &'static str {
        match self {
            EncodingKind::Int => "int",
            EncodingKind::Float => "float",
            EncodingKind::Str => "str",
            EncodingKind::Bool => "bool",
            EncodingKind::Buffer => "buffer",
            EncodingKind::Json => "json",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "int" => Some(EncodingKind::Int),
            "float" => Some(EncodingKind::Float),
            "str" => Some(EncodingKind::Str),
            "bool" => Some(EncodingKind::Bool),
            "buffer" => Some(EncodingKind::Buffer),
            "json" => Some(EncodingKind::Json),
            _ => None,
        }
    }
}

/// Whether the field is a scalar or a diffable sub-collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollectionKind {
    #[default]
    None,
    /// Indexed array; diffs address elements by index and may truncate.
    Array,
    /// Keyed record; diffs set and remove string keys.
    Record,
}

impl CollectionKind {
    pub fn name(&self) -> &'static str {
        match self {
            CollectionKind::None => "none",
            CollectionKind::Array => "array",
            CollectionKind::Record => "record",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "none" => Some(CollectionKind::None),
            "array" => Some(CollectionKind::Array),
            "record" => Some(CollectionKind::Record),
            _ => None,
        }
    }
}

/// Declarative field definition fed to the registry at startup.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub encoding: EncodingKind,
    pub collection: CollectionKind,
    pub default: Value,
    /// Not persisted.
    pub ephemeral: bool,
    /// Not replicated to clients; gets no wire id.
    pub server_only: bool,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            encoding: EncodingKind::default(),
            collection: CollectionKind::default(),
            default: Value::Null,
            ephemeral: false,
            server_only: false,
        }
    }

    pub fn encoding(mut self, encoding: EncodingKind) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn array(mut self) -> Self {
        self.collection = CollectionKind::Array;
        self
    }

    pub fn record(mut self) -> Self {
        self.collection = CollectionKind::Record;
        self
    }

    pub fn default_value(mut self, default: Value) -> Self {
        self.default = default;
        self
    }

    pub fn ephemeral(mut self) -> Self {
        self.ephemeral = true;
        self
    }

    pub fn server_only(mut self) -> Self {
        self.server_only = true;
        self
    }
}

/// Immutable registered field. Replicated fields carry a stable wire id,
/// assigned monotonically at registration.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    pub id: Option<u16>,
    pub encoding: EncodingKind,
    pub collection: CollectionKind,
    pub default: Value,
    pub ephemeral: bool,
    pub server_only: bool,
}
