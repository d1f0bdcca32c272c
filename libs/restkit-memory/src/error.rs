#[derive(thiserror::Error, Debug)]
pub enum MemoryStoreError {
    #[error("query over '{0}' was never sourced")]
    NotSourced(String),

    #[error("query root belongs to data provider '{0}'")]
    ForeignRoot(String),

    #[error("no table for resource '{0}'")]
    UnknownResource(String),

    #[error("lambda parameter '{0}' is not bound")]
    UnboundParameter(String),

    #[error("cannot read '{member}' from a {kind} value")]
    NotARecord { member: String, kind: &'static str },

    #[error("selector produced a {0} value where a collection was expected")]
    NotACollection(&'static str),

    #[error("'{set}' already contains an entity with key {key}")]
    DuplicateKey { set: String, key: String },

    #[error("change-set item for '{0}' carries no entity")]
    Uninitialized(String),
}
