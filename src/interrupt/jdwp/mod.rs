//! Debug wire protocol client
//!
//! Implements [`RuntimeHandle`] over the JVM debug wire protocol, covering
//! only the commands the forceful interrupt needs.

pub mod connection;
pub mod packet;

use crate::config::types::{Result, SandboxError};
use crate::interrupt::{FrameId, FrameInfo, ObjectId, RuntimeHandle, ThreadId};
use connection::JdwpConnection;
use packet::{commands, signature_to_class_name, PacketReader, PacketWriter};
use std::collections::HashMap;

pub struct JdwpRuntime {
    connection: JdwpConnection,
    type_names: HashMap<u64, String>,
    method_names: HashMap<u64, HashMap<u64, String>>,
    field_ids: HashMap<(u64, String), u64>,
    disposed: bool,
}

impl JdwpRuntime {
    pub fn new(connection: JdwpConnection) -> Self {
        Self {
            connection,
            type_names: HashMap::new(),
            method_names: HashMap::new(),
            field_ids: HashMap::new(),
            disposed: false,
        }
    }

    fn writer(&self) -> PacketWriter {
        PacketWriter::new(self.connection.sizes())
    }

    fn type_name(&mut self, type_id: u64) -> Result<String> {
        if let Some(name) = self.type_names.get(&type_id) {
            return Ok(name.clone());
        }
        let data = self.writer().reference_type_id(type_id).finish();
        let reply = self
            .connection
            .request(commands::REFERENCE_TYPE_SIGNATURE, &data)?;
        let name = signature_to_class_name(
            &PacketReader::new(self.connection.sizes(), &reply).string()?,
        );
        self.type_names.insert(type_id, name.clone());
        Ok(name)
    }

    fn method_name(&mut self, type_id: u64, method_id: u64) -> Result<String> {
        if !self.method_names.contains_key(&type_id) {
            let data = self.writer().reference_type_id(type_id).finish();
            let reply = self
                .connection
                .request(commands::REFERENCE_TYPE_METHODS, &data)?;
            let mut reader = PacketReader::new(self.connection.sizes(), &reply);
            let mut methods = HashMap::new();
            for _ in 0..reader.count()? {
                let id = reader.method_id()?;
                let name = reader.string()?;
                let _signature = reader.string()?;
                let _modifiers = reader.i32()?;
                methods.insert(id, name);
            }
            self.method_names.insert(type_id, methods);
        }
        Ok(self
            .method_names
            .get(&type_id)
            .and_then(|methods| methods.get(&method_id))
            .cloned()
            .unwrap_or_else(|| format!("<method {method_id}>")))
    }

    /// Field id by name, searching the object's class and then its superclasses
    fn field_id(&mut self, object: ObjectId, field: &str) -> Result<u64> {
        let data = self.writer().object_id(object.0).finish();
        let reply = self
            .connection
            .request(commands::OBJECT_REFERENCE_TYPE, &data)?;
        let mut reader = PacketReader::new(self.connection.sizes(), &reply);
        let _tag = reader.u8()?;
        let mut type_id = reader.reference_type_id()?;

        while type_id != 0 {
            let key = (type_id, field.to_string());
            if let Some(id) = self.field_ids.get(&key) {
                return Ok(*id);
            }
            if let Some(id) = self.declared_field(type_id, field)? {
                self.field_ids.insert(key, id);
                return Ok(id);
            }
            let data = self.writer().reference_type_id(type_id).finish();
            let reply = self
                .connection
                .request(commands::CLASS_TYPE_SUPERCLASS, &data)?;
            type_id = PacketReader::new(self.connection.sizes(), &reply).reference_type_id()?;
        }
        Err(SandboxError::Interrupt(format!(
            "field {field} not found on object {}",
            object.0
        )))
    }

    fn declared_field(&mut self, type_id: u64, field: &str) -> Result<Option<u64>> {
        let data = self.writer().reference_type_id(type_id).finish();
        let reply = self
            .connection
            .request(commands::REFERENCE_TYPE_FIELDS, &data)?;
        let mut reader = PacketReader::new(self.connection.sizes(), &reply);
        for _ in 0..reader.count()? {
            let id = reader.field_id()?;
            let name = reader.string()?;
            let _signature = reader.string()?;
            let _modifiers = reader.i32()?;
            if name == field {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    fn field_value(&mut self, object: ObjectId, field: &str) -> Result<packet::TaggedValue> {
        let field_id = self.field_id(object, field)?;
        let data = self
            .writer()
            .object_id(object.0)
            .i32(1)
            .field_id(field_id)
            .finish();
        let reply = self.connection.request(commands::OBJECT_GET_VALUES, &data)?;
        let mut reader = PacketReader::new(self.connection.sizes(), &reply);
        if reader.count()? != 1 {
            return Err(SandboxError::Protocol(format!(
                "expected one value for field {field}"
            )));
        }
        reader.tagged_value()
    }
}

impl RuntimeHandle for JdwpRuntime {
    fn suspend(&mut self) -> Result<()> {
        self.connection.request(commands::VM_SUSPEND, &[]).map(|_| ())
    }

    fn resume(&mut self) -> Result<()> {
        self.connection.request(commands::VM_RESUME, &[]).map(|_| ())
    }

    fn threads(&mut self) -> Result<Vec<ThreadId>> {
        let reply = self.connection.request(commands::VM_ALL_THREADS, &[])?;
        let mut reader = PacketReader::new(self.connection.sizes(), &reply);
        let count = reader.count()?;
        let mut threads = Vec::with_capacity(count);
        for _ in 0..count {
            threads.push(ThreadId(reader.object_id()?));
        }
        Ok(threads)
    }

    fn frames(&mut self, thread: ThreadId) -> Result<Vec<FrameInfo>> {
        let data = self.writer().object_id(thread.0).i32(0).i32(-1).finish();
        let reply = self.connection.request(commands::THREAD_FRAMES, &data)?;
        let mut reader = PacketReader::new(self.connection.sizes(), &reply);
        let count = reader.count()?;
        let mut locations = Vec::with_capacity(count);
        for _ in 0..count {
            let frame_id = reader.frame_id()?;
            let _type_tag = reader.u8()?;
            let type_id = reader.reference_type_id()?;
            let method_id = reader.method_id()?;
            let _index = reader.u64()?;
            locations.push((frame_id, type_id, method_id));
        }

        let mut frames = Vec::with_capacity(count);
        for (frame_id, type_id, method_id) in locations {
            frames.push(FrameInfo {
                frame_id: FrameId(frame_id),
                declaring_type: self.type_name(type_id)?,
                method: self.method_name(type_id, method_id)?,
            });
        }
        Ok(frames)
    }

    fn this_object(&mut self, thread: ThreadId, frame: FrameId) -> Result<Option<ObjectId>> {
        let data = self
            .writer()
            .object_id(thread.0)
            .frame_id(frame.0)
            .finish();
        let reply = self.connection.request(commands::FRAME_THIS_OBJECT, &data)?;
        let value = PacketReader::new(self.connection.sizes(), &reply).tagged_value()?;
        Ok(value.as_object().map(ObjectId))
    }

    fn boolean_field(&mut self, object: ObjectId, field: &str) -> Result<bool> {
        let value = self.field_value(object, field)?;
        value
            .as_bool()
            .ok_or_else(|| SandboxError::Interrupt(format!("field {field} is not a boolean")))
    }

    fn set_boolean_field(&mut self, object: ObjectId, field: &str, value: bool) -> Result<()> {
        let field_id = self.field_id(object, field)?;
        let data = self
            .writer()
            .object_id(object.0)
            .i32(1)
            .field_id(field_id)
            .u8(u8::from(value))
            .finish();
        self.connection
            .request(commands::OBJECT_SET_VALUES, &data)
            .map(|_| ())
    }

    fn object_field(&mut self, object: ObjectId, field: &str) -> Result<Option<ObjectId>> {
        let value = self.field_value(object, field)?;
        if !value.is_object() {
            return Err(SandboxError::Interrupt(format!(
                "field {field} is not a reference"
            )));
        }
        Ok(value.as_object().map(ObjectId))
    }

    fn stop_thread(&mut self, thread: ThreadId, exception: ObjectId) -> Result<()> {
        let data = self
            .writer()
            .object_id(thread.0)
            .object_id(exception.0)
            .finish();
        self.connection
            .request(commands::THREAD_STOP, &data)
            .map(|_| ())
    }

    fn dispose(&mut self) -> Result<()> {
        if self.disposed {
            return Ok(());
        }
        self.disposed = true;
        let result = self.connection.request(commands::VM_DISPOSE, &[]).map(|_| ());
        self.connection.shutdown();
        result
    }
}
