use parking_lot::RwLock;
use serde_json::{Map, Value};

/// Top-level task inputs and the outputs produced by the end node
#[derive(Debug, Default)]
pub struct IoCenter {
    inputs: RwLock<Map<String, Value>>,
    outputs: RwLock<Map<String, Value>>,
}

impl IoCenter {
    pub fn new(inputs: Map<String, Value>) -> Self {
        Self {
            inputs: RwLock::new(inputs),
            outputs: RwLock::new(Map::new()),
        }
    }

    pub fn inputs(&self) -> Map<String, Value> {
        self.inputs.read().clone()
    }

    pub fn set_inputs(&self, inputs: Map<String, Value>) {
        *self.inputs.write() = inputs;
    }

    pub fn outputs(&self) -> Map<String, Value> {
        self.outputs.read().clone()
    }

    pub fn set_outputs(&self, outputs: Map<String, Value>) {
        *self.outputs.write() = outputs;
    }
}
