//! The builder session: definition state for protocols and messages.
//!
//! A session owns the protocol registry,
//! the at-most-one protocol definition in progress,
//! the current message template with its stack of open containers,
//! and the pending field-value environment.
//! Field declarations route to the protocol in progress when one is open,
//! otherwise to the innermost open container.
//!
//! All registries live on the session value;
//! there is no process-wide state.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::sync::Arc;

use snafu::{ensure, OptionExt, ResultExt, Snafu};
use tracing::debug;

use crate::container::{BinaryTemplate, BitField, ListTemplate, StructTemplate, UnionTemplate};
use crate::encode;
use crate::env::{FieldValues, PathError};
use crate::field::{Char, Field, Pdu, SchemaError, UInt};
use crate::length::ParseLengthError;
use crate::message::Message;
use crate::protocol::{self, Protocol};
use crate::template::{Diagnostic, MessageTemplate, ValidateError};

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("protocol `{}` is still being defined", name))]
    ProtocolInProgress { name: String },

    #[snafu(display("protocol `{}` is already defined", name))]
    DuplicateProtocol { name: String },

    #[snafu(display("no protocol named `{}`", name))]
    UnknownProtocol { name: String },

    /// no protocol definition is open
    NoProtocolInProgress,

    /// no message template has been started
    NoMessage,

    #[snafu(display("container `{}` is still open", name))]
    UnbalancedContainers { name: String },

    #[snafu(display("no open {} to close", requested))]
    NothingToClose { requested: &'static str },

    #[snafu(display(
        "cannot close `{}` as a {}: it is a {}",
        name,
        requested,
        actual
    ))]
    MismatchedClose {
        name: String,
        requested: &'static str,
        actual: &'static str,
    },

    /// bit fields can only be declared inside a binary container
    BitOutsideBinary,

    #[snafu(display("invalid length expression"))]
    BadLength { source: ParseLengthError },

    #[snafu(display("invalid field declaration"))]
    Schema { source: SchemaError },

    #[snafu(display("invalid header field declaration"))]
    ProtocolSchema { source: protocol::Error },

    #[snafu(display("invalid field path"))]
    BadPath { source: PathError },

    #[snafu(display("could not encode message"))]
    Encode { source: encode::Error },

    #[snafu(display("could not validate message"))]
    Validate { source: ValidateError },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug)]
enum OpenContainer {
    Struct(StructTemplate),
    List(ListTemplate),
    Union(UnionTemplate),
    Binary(BinaryTemplate),
}

impl OpenContainer {
    fn kind(&self) -> &'static str {
        match self {
            OpenContainer::Struct(_) => "struct",
            OpenContainer::List(_) => "list",
            OpenContainer::Union(_) => "union",
            OpenContainer::Binary(_) => "binary container",
        }
    }

    fn name(&self) -> &str {
        match self {
            OpenContainer::Struct(c) => c.name(),
            OpenContainer::List(c) => c.name(),
            OpenContainer::Union(c) => c.name(),
            OpenContainer::Binary(c) => c.name(),
        }
    }

    fn add(&mut self, field: Field) -> std::result::Result<(), SchemaError> {
        match self {
            OpenContainer::Struct(c) => c.add(field),
            OpenContainer::List(c) => c.add(field),
            OpenContainer::Union(c) => c.add(field),
            OpenContainer::Binary(c) => {
                crate::field::NonBitFieldSnafu { container: c.name() }.fail()
            }
        }
    }

    fn close(self) -> std::result::Result<Field, SchemaError> {
        match self {
            OpenContainer::Struct(c) => Ok(c.into()),
            OpenContainer::List(c) => {
                c.verify()?;
                Ok(c.into())
            }
            OpenContainer::Union(c) => Ok(c.into()),
            OpenContainer::Binary(c) => {
                c.verify()?;
                Ok(c.into())
            }
        }
    }
}

/// Definition and encoding state for one test sequence.
#[derive(Debug, Default)]
pub struct Session {
    protocols: HashMap<String, Arc<Protocol>>,
    protocol_in_progress: Option<Protocol>,
    message: Option<MessageTemplate>,
    open: Vec<OpenContainer>,
    values: FieldValues,
}

impl Session {
    pub fn new() -> Self {
        Session::default()
    }

    /// Drop every protocol, template and pending value.
    pub fn reset(&mut self) {
        *self = Session::default();
    }

    /// Open a new protocol definition.
    pub fn start_protocol(&mut self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        if let Some(current) = &self.protocol_in_progress {
            return ProtocolInProgressSnafu { name: current.name() }.fail();
        }
        ensure!(
            !self.protocols.contains_key(&name),
            DuplicateProtocolSnafu { name }
        );
        self.protocol_in_progress = Some(Protocol::new(name));
        Ok(())
    }

    /// Commit the protocol in progress to the registry.
    /// The protocol is immutable from here on.
    pub fn end_protocol(&mut self) -> Result<()> {
        let protocol = self
            .protocol_in_progress
            .take()
            .context(NoProtocolInProgressSnafu)?;
        debug!(
            "protocol {} defined with {} header fields",
            protocol.name(),
            protocol.fields().len()
        );
        self.protocols
            .insert(protocol.name().to_string(), Arc::new(protocol));
        Ok(())
    }

    /// A committed protocol by name.
    pub fn protocol(&self, name: &str) -> Result<&Arc<Protocol>> {
        self.protocols
            .get(name)
            .context(UnknownProtocolSnafu { name })
    }

    /// Start defining a message template over a committed protocol,
    /// resetting the container stack and the pending values.
    pub fn new_message(
        &mut self,
        name: impl Into<String>,
        protocol: &str,
        header_values: impl IntoIterator<Item = (String, String)>,
    ) -> Result<()> {
        if let Some(current) = &self.protocol_in_progress {
            return ProtocolInProgressSnafu { name: current.name() }.fail();
        }
        let protocol = self.protocol(protocol)?.clone();
        let headers: BTreeMap<String, String> = header_values.into_iter().collect();
        self.message = Some(MessageTemplate::new(name, protocol, headers));
        self.open.clear();
        self.values = FieldValues::new();
        Ok(())
    }

    /// Route a field to the protocol in progress
    /// or to the innermost open scope.
    pub fn add_field(&mut self, field: impl Into<Field>) -> Result<()> {
        let field = field.into();
        if let Some(protocol) = &mut self.protocol_in_progress {
            return protocol.add(field).context(ProtocolSchemaSnafu);
        }
        if let Some(container) = self.open.last_mut() {
            return container.add(field).context(SchemaSnafu);
        }
        self.message
            .as_mut()
            .context(NoMessageSnafu)?
            .add(field)
            .context(SchemaSnafu)
    }

    /// Declare an unsigned integer field of `width` bytes.
    pub fn uint(&mut self, width: usize, name: &str, default: Option<&str>) -> Result<()> {
        let field = UInt::new(width, name, default).context(SchemaSnafu)?;
        self.add_field(field)
    }

    /// Declare an unsigned integer field padded up to `align` bytes.
    pub fn aligned_uint(
        &mut self,
        width: usize,
        name: &str,
        default: Option<&str>,
        align: usize,
    ) -> Result<()> {
        let field = UInt::aligned(width, name, default, Some(align)).context(SchemaSnafu)?;
        self.add_field(field)
    }

    /// Declare a character field.
    /// `length` is a byte count or a reference to an earlier field.
    pub fn chars(&mut self, length: &str, name: &str, default: Option<&str>) -> Result<()> {
        let length = length.parse().context(BadLengthSnafu)?;
        let field = Char::new(length, name, default).context(SchemaSnafu)?;
        self.add_field(field)
    }

    /// Declare the PDU payload slot in the protocol in progress.
    /// `length` must reference an earlier header field.
    pub fn pdu(&mut self, length: &str) -> Result<()> {
        let length = length.parse().context(BadLengthSnafu)?;
        self.add_field(Pdu::new(length))
    }

    /// Declare a bit field inside the open binary container.
    pub fn bin(&mut self, bits: usize, name: &str, default: Option<&str>) -> Result<()> {
        let field = BitField::new(bits, name, default).context(SchemaSnafu)?;
        match self.open.last_mut() {
            Some(OpenContainer::Binary(container)) => {
                container.add(field).context(SchemaSnafu)
            }
            _ => BitOutsideBinarySnafu.fail(),
        }
    }

    fn start_container(&mut self, container: OpenContainer) -> Result<()> {
        if let Some(current) = &self.protocol_in_progress {
            return ProtocolInProgressSnafu { name: current.name() }.fail();
        }
        ensure!(self.message.is_some(), NoMessageSnafu);
        self.open.push(container);
        Ok(())
    }

    fn end_container(&mut self, requested: &'static str) -> Result<()> {
        let top = self.open.last().context(NothingToCloseSnafu { requested })?;
        ensure!(
            top.kind() == requested,
            MismatchedCloseSnafu {
                name: top.name(),
                requested,
                actual: top.kind(),
            }
        );
        let container = self
            .open
            .pop()
            .context(NothingToCloseSnafu { requested })?;
        let field = container.close().context(SchemaSnafu)?;
        self.add_field(field)
    }

    /// Open a struct scope, with an optional declared byte length.
    pub fn start_struct(&mut self, name: &str, length: Option<usize>) -> Result<()> {
        self.start_container(OpenContainer::Struct(StructTemplate::new(name, length)))
    }

    pub fn end_struct(&mut self) -> Result<()> {
        self.end_container("struct")
    }

    /// Open a list scope.
    /// `size` is an element count or a reference to an earlier field.
    pub fn start_list(&mut self, size: &str, name: &str) -> Result<()> {
        let size = size.parse().context(BadLengthSnafu)?;
        self.start_container(OpenContainer::List(ListTemplate::new(size, name)))
    }

    pub fn end_list(&mut self) -> Result<()> {
        self.end_container("list")
    }

    /// Open a union scope.
    pub fn start_union(&mut self, name: &str) -> Result<()> {
        self.start_container(OpenContainer::Union(UnionTemplate::new(name)))
    }

    pub fn end_union(&mut self) -> Result<()> {
        self.end_container("union")
    }

    /// Open a binary container scope,
    /// with an optional declared byte length.
    pub fn start_binary(&mut self, name: &str, length: Option<usize>) -> Result<()> {
        self.start_container(OpenContainer::Binary(BinaryTemplate::new(name, length)))
    }

    /// Close the binary container,
    /// verifying that its bit fields fill whole bytes.
    pub fn end_binary(&mut self) -> Result<()> {
        self.end_container("binary container")
    }

    /// Record a pending override for the next encode or receive.
    pub fn value(&mut self, path: &str, value: impl Display) -> Result<()> {
        self.values.set(path, value).context(BadPathSnafu)
    }

    /// The completed message template.
    /// Fails while a container is still open.
    pub fn message_template(&self) -> Result<&MessageTemplate> {
        if let Some(container) = self.open.last() {
            return UnbalancedContainersSnafu { name: container.name() }.fail();
        }
        self.message.as_ref().context(NoMessageSnafu)
    }

    /// Snapshot the pending field values, clearing them.
    pub fn take_values(&mut self) -> FieldValues {
        self.values.take()
    }

    /// Encode the current template with the pending values.
    pub fn encode(&mut self) -> Result<Message> {
        self.encode_with(&[], &[])
    }

    /// Encode the current template with the pending values
    /// plus the given field and header overrides.
    pub fn encode_with(
        &mut self,
        fields: &[(&str, &str)],
        header_values: &[(&str, &str)],
    ) -> Result<Message> {
        let template = self.message_template()?;
        let headers: BTreeMap<String, String> = header_values
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        let mut values = self.values.clone();
        for (path, value) in fields {
            values.set(path, value).context(BadPathSnafu)?;
        }
        let message = template.encode(&values, &headers).context(EncodeSnafu)?;
        self.values = FieldValues::new();
        Ok(message)
    }

    /// Validate a message against the pending values
    /// plus the given expectations, clearing the pending values.
    pub fn validate(
        &mut self,
        message: &Message,
        expectations: &[(&str, &str)],
    ) -> Result<Vec<Diagnostic>> {
        let template = self.message_template()?;
        let mut values = self.values.clone();
        for (path, value) in expectations {
            values.set(path, value).context(BadPathSnafu)?;
        }
        let diagnostics = template.validate(message, &values).context(ValidateSnafu)?;
        self.values = FieldValues::new();
        Ok(diagnostics)
    }
}
