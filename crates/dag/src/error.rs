use std::fmt;
use std::fmt::Display;

#[derive(Debug, PartialEq)]
pub enum DagError {
    DuplicateNode(String),
    MissingDependency { mapping: String, dependency: String },
    CycleDetected(Vec<String>),
    NotFound(String),
}

impl Display for DagError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DagError::CycleDetected(r) => {
                write!(f, "Found cyclic dependencies between mappings:")?;
                for m in r {
                    write!(f, "\n - {}", m)?;
                }
                Ok(())
            }
            DagError::DuplicateNode(r) => {
                write!(f, "Found duplicated declaration of mapping: {r:?}")
            }
            DagError::MissingDependency {
                mapping,
                dependency,
            } => write!(
                f,
                "Mapping {mapping:?} depends on entity type {dependency:?} but no mapping syncs it"
            ),
            DagError::NotFound(r) => write!(f, "No mapping or entity type named {r:?}"),
        }
    }
}

impl std::error::Error for DagError {}
