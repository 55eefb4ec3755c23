// src/graph/error.rs

use super::NodeId;
use super::requirement::Requirement;
use std::fmt;
use thiserror::Error;

/// Node identity carried by errors, readable after the graph is gone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeLabel {
    pub id: NodeId,
    pub name: String,
}

impl fmt::Display for NodeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Dependency graph resolution failures
#[derive(Error, Debug, Clone)]
pub enum GraphError {
    /// A package requires itself, directly or through its dependencies
    #[error(
        "There is a cycle/loop in the graph:\n    Initial ancestor: {ancestor}\n    Require: {require}\n    Dependency: {node}"
    )]
    Loop {
        node: NodeLabel,
        require: Requirement,
        ancestor: NodeLabel,
    },

    /// Two requirements of the same package disagree on the version
    #[error("Version conflict: {node} => {require}, {prev_consumer} => {prev_require}")]
    Conflict {
        node: NodeLabel,
        require: Requirement,
        /// Node already resolved for the package, if it was expanded
        prev_node: Option<NodeLabel>,
        prev_require: Requirement,
        /// Node that declared `prev_require`
        prev_consumer: NodeLabel,
        /// Node where both requirements met
        base_previous: NodeLabel,
    },

    /// Same version, but options the consumer wants differ from the ones
    /// the package was already resolved with
    #[error(
        "Configuration conflict: {node} => {require} wants '{option}={value}', \
         {prev_consumer} => {prev_require} resolved '{option}={prev_value}'"
    )]
    ConflictConfig {
        node: NodeLabel,
        require: Requirement,
        prev_node: NodeLabel,
        prev_require: Requirement,
        prev_consumer: NodeLabel,
        option: String,
        prev_value: String,
        value: String,
    },

    /// The recipe could not be found or evaluated
    #[error("Package '{require}' not resolved for {node}: {message}")]
    Missing {
        node: NodeLabel,
        require: Requirement,
        message: String,
    },

    /// Two packages claim the same capability
    #[error("Provide conflict: both {node} and {other} provide '{capability}'")]
    ProvidesConflict {
        capability: String,
        node: NodeLabel,
        other: NodeLabel,
    },
}
