// WAMP messages
// WAMP v2 messages in their JSON array form

use crate::{Error, Result};
use serde_json::{Map, Value};

pub const HELLO: u64 = 1;
pub const WELCOME: u64 = 2;
pub const ABORT: u64 = 3;
pub const GOODBYE: u64 = 6;
pub const ERROR: u64 = 8;
pub const CALL: u64 = 48;
pub const RESULT: u64 = 50;
pub const REGISTER: u64 = 64;
pub const REGISTERED: u64 = 65;
pub const UNREGISTER: u64 = 66;
pub const UNREGISTERED: u64 = 67;
pub const INVOCATION: u64 = 68;
pub const YIELD: u64 = 70;

pub type Dict = Map<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Hello {
        realm: String,
        details: Dict,
    },
    Welcome {
        session: u64,
        details: Dict,
    },
    Abort {
        details: Dict,
        reason: String,
    },
    Goodbye {
        details: Dict,
        reason: String,
    },
    Error {
        request_type: u64,
        request: u64,
        details: Dict,
        error: String,
        args: Vec<Value>,
        kwargs: Dict,
    },
    Call {
        request: u64,
        options: Dict,
        procedure: String,
        args: Vec<Value>,
        kwargs: Dict,
    },
    Result {
        request: u64,
        details: Dict,
        args: Vec<Value>,
        kwargs: Dict,
    },
    Register {
        request: u64,
        options: Dict,
        procedure: String,
    },
    Registered {
        request: u64,
        registration: u64,
    },
    Unregister {
        request: u64,
        registration: u64,
    },
    Unregistered {
        request: u64,
    },
    Invocation {
        request: u64,
        registration: u64,
        details: Dict,
        args: Vec<Value>,
        kwargs: Dict,
    },
    Yield {
        request: u64,
        options: Dict,
        args: Vec<Value>,
        kwargs: Dict,
    },
}

impl Message {
    pub fn abort(reason: &str, message: impl Into<String>) -> Self {
        let mut details = Dict::new();
        details.insert("message".to_string(), Value::String(message.into()));
        Message::Abort {
            details,
            reason: reason.to_string(),
        }
    }

    pub fn goodbye(reason: &str) -> Self {
        Message::Goodbye {
            details: Dict::new(),
            reason: reason.to_string(),
        }
    }

    /// ERROR reply to the request `request` of type `request_type`
    pub fn error(request_type: u64, request: u64, err: &Error) -> Self {
        Message::Error {
            request_type,
            request,
            details: Dict::new(),
            error: err.wamp_uri().to_string(),
            args: vec![Value::String(err.wamp_message())],
            kwargs: Dict::new(),
        }
    }

    pub fn code(&self) -> u64 {
        match self {
            Message::Hello { .. } => HELLO,
            Message::Welcome { .. } => WELCOME,
            Message::Abort { .. } => ABORT,
            Message::Goodbye { .. } => GOODBYE,
            Message::Error { .. } => ERROR,
            Message::Call { .. } => CALL,
            Message::Result { .. } => RESULT,
            Message::Register { .. } => REGISTER,
            Message::Registered { .. } => REGISTERED,
            Message::Unregister { .. } => UNREGISTER,
            Message::Unregistered { .. } => UNREGISTERED,
            Message::Invocation { .. } => INVOCATION,
            Message::Yield { .. } => YIELD,
        }
    }

    pub fn to_value(&self) -> Value {
        let mut items = vec![Value::from(self.code())];
        match self {
            Message::Hello { realm, details } => {
                items.push(realm.as_str().into());
                items.push(Value::Object(details.clone()));
            }
            Message::Welcome { session, details } => {
                items.push((*session).into());
                items.push(Value::Object(details.clone()));
            }
            Message::Abort { details, reason } | Message::Goodbye { details, reason } => {
                items.push(Value::Object(details.clone()));
                items.push(reason.as_str().into());
            }
            Message::Error {
                request_type,
                request,
                details,
                error,
                args,
                kwargs,
            } => {
                items.push((*request_type).into());
                items.push((*request).into());
                items.push(Value::Object(details.clone()));
                items.push(error.as_str().into());
                push_payload(&mut items, args, kwargs);
            }
            Message::Call {
                request,
                options,
                procedure,
                args,
                kwargs,
            } => {
                items.push((*request).into());
                items.push(Value::Object(options.clone()));
                items.push(procedure.as_str().into());
                push_payload(&mut items, args, kwargs);
            }
            Message::Result {
                request,
                details,
                args,
                kwargs,
            } => {
                items.push((*request).into());
                items.push(Value::Object(details.clone()));
                push_payload(&mut items, args, kwargs);
            }
            Message::Register {
                request,
                options,
                procedure,
            } => {
                items.push((*request).into());
                items.push(Value::Object(options.clone()));
                items.push(procedure.as_str().into());
            }
            Message::Registered {
                request,
                registration,
            }
            | Message::Unregister {
                request,
                registration,
            } => {
                items.push((*request).into());
                items.push((*registration).into());
            }
            Message::Unregistered { request } => {
                items.push((*request).into());
            }
            Message::Invocation {
                request,
                registration,
                details,
                args,
                kwargs,
            } => {
                items.push((*request).into());
                items.push((*registration).into());
                items.push(Value::Object(details.clone()));
                push_payload(&mut items, args, kwargs);
            }
            Message::Yield {
                request,
                options,
                args,
                kwargs,
            } => {
                items.push((*request).into());
                items.push(Value::Object(options.clone()));
                push_payload(&mut items, args, kwargs);
            }
        }
        Value::Array(items)
    }

    pub fn to_json(&self) -> String {
        self.to_value().to_string()
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| Error::protocol(format!("Invalid JSON frame: {}", e)))?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let items = value
            .as_array()
            .ok_or_else(|| Error::protocol("Message must be a JSON array"))?;
        let frame = Frame(items);
        let code = frame.id(0)?;

        let message = match code {
            HELLO => Message::Hello {
                realm: frame.string(1)?,
                details: frame.dict(2)?,
            },
            WELCOME => Message::Welcome {
                session: frame.id(1)?,
                details: frame.dict(2)?,
            },
            ABORT => Message::Abort {
                details: frame.dict(1)?,
                reason: frame.string(2)?,
            },
            GOODBYE => Message::Goodbye {
                details: frame.dict(1)?,
                reason: frame.string(2)?,
            },
            ERROR => Message::Error {
                request_type: frame.id(1)?,
                request: frame.id(2)?,
                details: frame.dict(3)?,
                error: frame.string(4)?,
                args: frame.args(5)?,
                kwargs: frame.kwargs(6)?,
            },
            CALL => Message::Call {
                request: frame.id(1)?,
                options: frame.dict(2)?,
                procedure: frame.string(3)?,
                args: frame.args(4)?,
                kwargs: frame.kwargs(5)?,
            },
            RESULT => Message::Result {
                request: frame.id(1)?,
                details: frame.dict(2)?,
                args: frame.args(3)?,
                kwargs: frame.kwargs(4)?,
            },
            REGISTER => Message::Register {
                request: frame.id(1)?,
                options: frame.dict(2)?,
                procedure: frame.string(3)?,
            },
            REGISTERED => Message::Registered {
                request: frame.id(1)?,
                registration: frame.id(2)?,
            },
            UNREGISTER => Message::Unregister {
                request: frame.id(1)?,
                registration: frame.id(2)?,
            },
            UNREGISTERED => Message::Unregistered {
                request: frame.id(1)?,
            },
            INVOCATION => Message::Invocation {
                request: frame.id(1)?,
                registration: frame.id(2)?,
                details: frame.dict(3)?,
                args: frame.args(4)?,
                kwargs: frame.kwargs(5)?,
            },
            YIELD => Message::Yield {
                request: frame.id(1)?,
                options: frame.dict(2)?,
                args: frame.args(3)?,
                kwargs: frame.kwargs(4)?,
            },
            other => {
                return Err(Error::protocol(format!("Unknown message type {}", other)));
            }
        };

        Ok(message)
    }
}

// Trailing empty payload elements are left out
fn push_payload(items: &mut Vec<Value>, args: &[Value], kwargs: &Dict) {
    if args.is_empty() && kwargs.is_empty() {
        return;
    }
    items.push(Value::Array(args.to_vec()));
    if !kwargs.is_empty() {
        items.push(Value::Object(kwargs.clone()));
    }
}

struct Frame<'a>(&'a [Value]);

impl Frame<'_> {
    fn get(&self, index: usize) -> Result<&Value> {
        self.0
            .get(index)
            .ok_or_else(|| Error::protocol(format!("Missing message element {}", index)))
    }

    fn id(&self, index: usize) -> Result<u64> {
        self.get(index)?
            .as_u64()
            .ok_or_else(|| Error::protocol(format!("Element {} must be an id", index)))
    }

    fn string(&self, index: usize) -> Result<String> {
        self.get(index)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::protocol(format!("Element {} must be a string", index)))
    }

    fn dict(&self, index: usize) -> Result<Dict> {
        self.get(index)?
            .as_object()
            .cloned()
            .ok_or_else(|| Error::protocol(format!("Element {} must be a dict", index)))
    }

    fn args(&self, index: usize) -> Result<Vec<Value>> {
        match self.0.get(index) {
            None => Ok(Vec::new()),
            Some(Value::Array(args)) => Ok(args.clone()),
            Some(_) => Err(Error::protocol(format!("Element {} must be a list", index))),
        }
    }

    fn kwargs(&self, index: usize) -> Result<Dict> {
        match self.0.get(index) {
            None => Ok(Dict::new()),
            Some(Value::Object(kwargs)) => Ok(kwargs.clone()),
            Some(_) => Err(Error::protocol(format!("Element {} must be a dict", index))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_decode_hello() {
        let msg = Message::from_json(r#"[1, "realm1", {"roles": {"caller": {}}}]"#).unwrap();
        match msg {
            Message::Hello { realm, details } => {
                assert_eq!(realm, "realm1");
                assert!(details.contains_key("roles"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_call_without_payload() {
        let msg = Message::from_json(r#"[48, 7, {}, "com.example.get"]"#).unwrap();
        assert_eq!(
            msg,
            Message::Call {
                request: 7,
                options: Dict::new(),
                procedure: "com.example.get".to_string(),
                args: vec![],
                kwargs: Dict::new(),
            }
        );
    }

    #[test]
    fn test_encode_omits_empty_payload() {
        let msg = Message::Result {
            request: 3,
            details: Dict::new(),
            args: vec![],
            kwargs: Dict::new(),
        };
        assert_eq!(msg.to_value(), json!([50, 3, {}]));

        let msg = Message::Result {
            request: 3,
            details: Dict::new(),
            args: vec![json!(42)],
            kwargs: Dict::new(),
        };
        assert_eq!(msg.to_value(), json!([50, 3, {}, [42]]));
    }

    #[test]
    fn test_encode_kwargs_only_keeps_empty_args() {
        let mut kwargs = Dict::new();
        kwargs.insert("port".into(), json!(8080));
        let msg = Message::Yield {
            request: 9,
            options: Dict::new(),
            args: vec![],
            kwargs,
        };
        assert_eq!(msg.to_value(), json!([70, 9, {}, [], {"port": 8080}]));
    }

    #[test]
    fn test_error_message_from_crate_error() {
        let msg = Message::error(CALL, 12, &Error::NoSuchProcedure("a.b".into()));
        assert_eq!(
            msg.to_value(),
            json!([8, 48, 12, {}, "wamp.error.no_such_procedure", ["No such procedure: a.b"]])
        );
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(Message::from_json("not json").is_err());
        assert!(Message::from_json("{}").is_err());
        assert!(Message::from_json("[]").is_err());
        assert!(Message::from_json("[999]").is_err());
        assert!(Message::from_json(r#"[1, 5, {}]"#).is_err());
        assert!(Message::from_json(r#"[48, 1, {}, "a.b", "notalist"]"#).is_err());
        assert!(Message::from_json(r#"[64, -1, {}, "a.b"]"#).is_err());

        let err = Message::from_json("[6, {}]").unwrap_err();
        assert_eq!(err.wamp_uri(), "wamp.error.protocol_violation");
    }

    #[test]
    fn test_reencode_is_stable() {
        let frames = [
            r#"[2,1,{"roles":{"dealer":{}}}]"#,
            r#"[3,{"message":"nope"},"wamp.error.no_such_realm"]"#,
            r#"[8,68,5,{},"com.example.error",["boom"],{"code":1}]"#,
            r#"[65,1,2]"#,
            r#"[67,4]"#,
            r#"[68,10,2,{},[1,2]]"#,
        ];
        for frame in frames {
            let msg = Message::from_json(frame).unwrap();
            assert_eq!(msg.to_json(), frame);
        }
    }

    proptest! {
        #[test]
        fn prop_decode_never_panics(text in "\\PC*") {
            let _ = Message::from_json(&text);
        }

        #[test]
        fn prop_decode_arbitrary_arrays(code in 0u64..100, extra in proptest::collection::vec(any::<i64>(), 0..6)) {
            let mut items = vec![json!(code)];
            items.extend(extra.into_iter().map(|v| json!(v)));
            let _ = Message::from_value(&Value::Array(items));
        }
    }
}
