//! Client endpoint index
//!
//! Every slot is reachable by the browser runtime as `<template>/<slot>`.
//! Keys embed the template path, so two files never compete for one key.

use std::collections::HashMap;
use std::sync::Arc;

use super::template::{Slot, Template};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Container,
    Data,
    Validator,
    Parser,
    Request,
    Handler,
    Loader,
    Dummy,
}

#[derive(Debug, Clone)]
pub struct Endpoint {
    /// Template declaring the slot
    pub template: String,
    pub slot: Arc<Slot>,
}

impl Endpoint {
    pub fn serves(&self, kind: EndpointKind) -> bool {
        let slot = &self.slot;
        match kind {
            EndpointKind::Container => slot.caps.container.is_some(),
            EndpointKind::Data => slot.caps.data.is_some(),
            EndpointKind::Validator => slot.client.validator.is_some(),
            EndpointKind::Parser => slot.client.parser.is_some(),
            EndpointKind::Request => slot.client.request.is_some(),
            EndpointKind::Handler => slot.client.handler.is_some(),
            EndpointKind::Loader => slot.client.loader.is_some(),
            EndpointKind::Dummy => slot.dummy.is_some(),
        }
    }
}

#[derive(Debug, Default)]
pub struct EndpointRegistry {
    entries: HashMap<String, Endpoint>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index every slot of `template`
    pub fn add(&mut self, template: &Template) {
        for slot in &template.slots {
            self.entries.insert(
                format!("{}/{}", template.path, slot.id),
                Endpoint {
                    template: template.path.clone(),
                    slot: Arc::clone(slot),
                },
            );
        }
    }

    /// Endpoint at `key`, if its slot serves `kind`
    pub fn lookup(&self, kind: EndpointKind, key: &str) -> Option<&Endpoint> {
        self.entries.get(key).filter(|e| e.serves(kind))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
