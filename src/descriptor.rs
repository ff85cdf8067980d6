//! Type descriptors in the remote runtime's notation.
//!
//! `Z B C S I J F D V`, `Lpkg/Name;` and `[elem`, with method descriptors of
//! the form `(args)ret`, e.g. `(Ljava/lang/Object;)Z`.

use std::fmt;

use crate::error::{BridgeError, Result};
use crate::native::JValue;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeSig {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Void,
    Object(String),
    Array(Box<TypeSig>),
}

impl TypeSig {
    pub fn parse(descriptor: &str) -> Result<Self> {
        let (sig, rest) = parse_one(descriptor, descriptor)?;
        if !rest.is_empty() {
            return Err(BridgeError::InvalidSignature(descriptor.to_string()));
        }
        Ok(sig)
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, TypeSig::Object(_) | TypeSig::Array(_))
    }

    /// Whether `value` may be passed in a slot of this type.
    ///
    /// A byte slot accepts both byte representations; the runtime rejects the
    /// one that does not match its configured signedness.
    pub fn accepts(&self, value: &JValue) -> bool {
        matches!(
            (self, value),
            (TypeSig::Boolean, JValue::Boolean(_))
                | (TypeSig::Byte, JValue::Byte(_) | JValue::UByte(_))
                | (TypeSig::Char, JValue::Char(_))
                | (TypeSig::Short, JValue::Short(_))
                | (TypeSig::Int, JValue::Int(_))
                | (TypeSig::Long, JValue::Long(_))
                | (TypeSig::Float, JValue::Float(_))
                | (TypeSig::Double, JValue::Double(_))
                | (TypeSig::Void, JValue::Void)
                | (TypeSig::Object(_) | TypeSig::Array(_), JValue::Object(_))
        )
    }
}

impl fmt::Display for TypeSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeSig::Boolean => f.write_str("Z"),
            TypeSig::Byte => f.write_str("B"),
            TypeSig::Char => f.write_str("C"),
            TypeSig::Short => f.write_str("S"),
            TypeSig::Int => f.write_str("I"),
            TypeSig::Long => f.write_str("J"),
            TypeSig::Float => f.write_str("F"),
            TypeSig::Double => f.write_str("D"),
            TypeSig::Void => f.write_str("V"),
            TypeSig::Object(name) => write!(f, "L{name};"),
            TypeSig::Array(elem) => write!(f, "[{elem}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodSig {
    pub args: Vec<TypeSig>,
    pub ret: TypeSig,
}

impl MethodSig {
    pub fn parse(descriptor: &str) -> Result<Self> {
        let invalid = || BridgeError::InvalidSignature(descriptor.to_string());

        let mut rest = descriptor.strip_prefix('(').ok_or_else(invalid)?;
        let mut args = Vec::new();
        while !rest.starts_with(')') {
            if rest.is_empty() {
                return Err(invalid());
            }
            let (arg, tail) = parse_one(rest, descriptor)?;
            if arg == TypeSig::Void {
                return Err(invalid());
            }
            args.push(arg);
            rest = tail;
        }

        let (ret, tail) = parse_one(&rest[1..], descriptor)?;
        if !tail.is_empty() {
            return Err(invalid());
        }

        Ok(Self { args, ret })
    }

    /// Check an argument list against the parameter types.
    pub fn check_args(&self, args: &[JValue]) -> Result<()> {
        if args.len() != self.args.len() {
            return Err(BridgeError::mismatch(
                format!("{} arguments", self.args.len()),
                format!("{} arguments", args.len()),
            ));
        }

        for (sig, value) in self.args.iter().zip(args) {
            if !sig.accepts(value) {
                return Err(BridgeError::mismatch(sig.to_string(), value.kind()));
            }
        }

        Ok(())
    }
}

impl fmt::Display for MethodSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for arg in &self.args {
            write!(f, "{arg}")?;
        }
        write!(f, "){}", self.ret)
    }
}

fn parse_one<'a>(input: &'a str, whole: &str) -> Result<(TypeSig, &'a str)> {
    let invalid = || BridgeError::InvalidSignature(whole.to_string());

    let mut chars = input.chars();
    let sig = match chars.next().ok_or_else(invalid)? {
        'Z' => TypeSig::Boolean,
        'B' => TypeSig::Byte,
        'C' => TypeSig::Char,
        'S' => TypeSig::Short,
        'I' => TypeSig::Int,
        'J' => TypeSig::Long,
        'F' => TypeSig::Float,
        'D' => TypeSig::Double,
        'V' => TypeSig::Void,
        'L' => {
            let body = &input[1..];
            let end = body.find(';').ok_or_else(invalid)?;
            if end == 0 {
                return Err(invalid());
            }
            return Ok((TypeSig::Object(body[..end].to_string()), &body[end + 1..]));
        }
        '[' => {
            let (elem, rest) = parse_one(&input[1..], whole)?;
            if elem == TypeSig::Void {
                return Err(invalid());
            }
            return Ok((TypeSig::Array(Box::new(elem)), rest));
        }
        _ => return Err(invalid()),
    };

    Ok((sig, chars.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::RawHandle;

    #[test]
    fn test_parse_equals_descriptor() {
        let sig = MethodSig::parse("(Ljava/lang/Object;)Z").unwrap();
        assert_eq!(sig.args, vec![TypeSig::Object("java/lang/Object".into())]);
        assert_eq!(sig.ret, TypeSig::Boolean);
        assert_eq!(sig.to_string(), "(Ljava/lang/Object;)Z");
    }

    #[test]
    fn test_parse_mixed_args() {
        let sig = MethodSig::parse("(IJ[BLjava/lang/String;D)V").unwrap();
        assert_eq!(
            sig.args,
            vec![
                TypeSig::Int,
                TypeSig::Long,
                TypeSig::Array(Box::new(TypeSig::Byte)),
                TypeSig::Object("java/lang/String".into()),
                TypeSig::Double,
            ]
        );
        assert_eq!(sig.ret, TypeSig::Void);
    }

    #[test]
    fn test_reject_malformed() {
        for bad in ["", "I", "(I", "()", "(V)I", "(L;)V", "(Ljava/lang/Object)Z", "()IZ", "(Q)V"] {
            assert!(
                matches!(MethodSig::parse(bad), Err(BridgeError::InvalidSignature(_))),
                "{bad} should be rejected"
            );
        }
        assert!(TypeSig::parse("II").is_err());
    }

    #[test]
    fn test_check_args() {
        let sig = MethodSig::parse("(BLjava/lang/Object;)V").unwrap();
        assert!(
            sig.check_args(&[JValue::Byte(-1), JValue::Object(RawHandle::NULL)])
                .is_ok()
        );
        assert!(
            sig.check_args(&[JValue::UByte(255), JValue::Object(RawHandle::NULL)])
                .is_ok()
        );
        assert!(sig.check_args(&[JValue::Int(1), JValue::Object(RawHandle::NULL)]).is_err());
        assert!(sig.check_args(&[JValue::Byte(1)]).is_err());
    }
}
