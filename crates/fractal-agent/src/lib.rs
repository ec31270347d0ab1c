//! The agent node (C6): the ReAct loop a fractal delegation tree bottoms
//! out in, built on the LLM, tool, memory, context, and bus ports.

pub mod node;

pub use node::{AgentNode, NodeConfig};
