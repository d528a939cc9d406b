//! Call framing.
//!
//! Request: `[str type][str key][str method][u8 argc][blob arg]*`.
//! Reply: `[u8 status]` followed by a result blob on success or a message
//! string otherwise. Strings and blobs use the [`meshdata_types::wire`]
//! length prefixes.

use bytes::{BufMut, Bytes, BytesMut};
use meshdata_types::wire;

use crate::{Result, RpcError};

const STATUS_OK: u8 = 0;
const STATUS_NOT_FOUND: u8 = 1;
const STATUS_NO_SUCH_METHOD: u8 = 2;
const STATUS_BAD_REQUEST: u8 = 3;
const STATUS_FAILED: u8 = 4;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CallRequest {
    pub service_type: String,
    pub key: String,
    pub method: String,
    pub args: Vec<Bytes>,
}

impl CallRequest {
    pub(crate) fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        wire::put_str(buf, &self.service_type)?;
        wire::put_str(buf, &self.key)?;
        wire::put_str(buf, &self.method)?;
        let argc = u8::try_from(self.args.len())
            .map_err(|_| RpcError::BadRequest(format!("too many arguments: {}", self.args.len())))?;
        buf.put_u8(argc);
        for arg in &self.args {
            wire::put_blob(buf, arg)?;
        }
        Ok(())
    }

    pub(crate) fn decode(buf: &mut Bytes) -> Result<Self> {
        let service_type = wire::get_str(buf)?;
        let key = wire::get_str(buf)?;
        let method = wire::get_str(buf)?;
        let argc = wire::get_u8(buf, "argument count")?;
        let args = (0..argc)
            .map(|_| wire::get_blob(buf))
            .collect::<meshdata_types::Result<Vec<_>>>()?;
        Ok(Self {
            service_type,
            key,
            method,
            args,
        })
    }
}

pub(crate) fn write_ok(out: &mut BytesMut, result: &[u8]) -> Result<()> {
    out.put_u8(STATUS_OK);
    wire::put_blob(out, result)?;
    Ok(())
}

pub(crate) fn write_error(out: &mut BytesMut, err: &RpcError) -> Result<()> {
    let (status, message) = match err {
        RpcError::NotFound { .. } => (STATUS_NOT_FOUND, err.to_string()),
        RpcError::NoSuchMethod { .. } => (STATUS_NO_SUCH_METHOD, err.to_string()),
        RpcError::BadRequest(msg) => (STATUS_BAD_REQUEST, msg.clone()),
        RpcError::Codec(_) | RpcError::Types(_) => (STATUS_BAD_REQUEST, err.to_string()),
        RpcError::Failed(msg) => (STATUS_FAILED, msg.clone()),
        other => (STATUS_FAILED, other.to_string()),
    };
    out.clear();
    out.put_u8(status);
    wire::put_str(out, &message)?;
    Ok(())
}

/// Returns the result blob, or the callee's error.
pub(crate) fn read_reply(mut reply: Bytes, request: &CallRequest) -> Result<Bytes> {
    let status = wire::get_u8(&mut reply, "call status")?;
    if status == STATUS_OK {
        return Ok(wire::get_blob(&mut reply)?);
    }
    let message = wire::get_str(&mut reply)?;
    Err(match status {
        STATUS_NOT_FOUND => RpcError::NotFound {
            service_type: request.service_type.clone(),
            key: request.key.clone(),
        },
        STATUS_NO_SUCH_METHOD => RpcError::NoSuchMethod {
            service_type: request.service_type.clone(),
            method: request.method.clone(),
        },
        STATUS_BAD_REQUEST => RpcError::BadRequest(message),
        STATUS_FAILED => RpcError::Failed(message),
        other => {
            return Err(meshdata_types::Error::Decode(format!("invalid call status: {other}")).into())
        }
    })
}
