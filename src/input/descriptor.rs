use crate::ast::Str;
use noak::{
    MStr,
    descriptor::{BaseType, MethodDescriptor, TypeDescriptor},
    error::DecodeError,
};

/// Per-method metadata.
#[derive(Clone, Copy, Debug)]
pub struct MethodInfo<'code> {
    pub is_static: bool,
    pub descriptor: &'code MStr,
    pub max_locals: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Parameter {
    pub slot: u16,
    pub width: u8,
}

impl MethodInfo<'_> {
    /// Parameter slots in declaration order. For instance methods, `this` comes first.
    pub fn parameters(&self) -> Result<Vec<Parameter>, DecodeError> {
        let descriptor = MethodDescriptor::parse(self.descriptor)?;
        let mut parameters = Vec::new();
        let mut slot = 0;
        if !self.is_static {
            parameters.push(Parameter { slot: 0, width: 1 });
            slot = 1;
        }
        for ty in descriptor.parameters() {
            let width = type_descriptor_width(ty);
            parameters.push(Parameter { slot, width });
            slot += width as u16;
        }
        Ok(parameters)
    }

    pub fn returns_void(&self) -> Result<bool, DecodeError> {
        Ok(MethodDescriptor::parse(self.descriptor)?
            .return_type()
            .is_none())
    }
}

/// Stack footprint of an invocation, without the receiver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallShape {
    pub arguments: Vec<u8>,
    pub return_width: u8,
}

pub fn call_shape(descriptor: Str<'_>) -> Result<CallShape, DecodeError> {
    let descriptor = MethodDescriptor::parse(descriptor.0)?;
    Ok(CallShape {
        arguments: descriptor.parameters().map(type_descriptor_width).collect(),
        return_width: descriptor
            .return_type()
            .map(type_descriptor_width)
            .unwrap_or(0),
    })
}

pub fn field_width(descriptor: Str<'_>) -> u8 {
    // D is double, J is long
    if descriptor.0 == "D" || descriptor.0 == "J" {
        2
    } else {
        1
    }
}

fn type_descriptor_width(descriptor: TypeDescriptor<'_>) -> u8 {
    if descriptor.dimensions == 0 && matches!(descriptor.base, BaseType::Double | BaseType::Long) {
        2
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mstr(bytes: &'static [u8]) -> &'static MStr {
        MStr::from_mutf8(bytes).unwrap()
    }

    #[test]
    fn parameter_slots() {
        let method = MethodInfo {
            is_static: false,
            descriptor: mstr(b"(IJ[DLjava/lang/String;)V"),
            max_locals: 8,
        };
        let slots: Vec<(u16, u8)> = method
            .parameters()
            .unwrap()
            .into_iter()
            .map(|p| (p.slot, p.width))
            .collect();
        assert_eq!(slots, vec![(0, 1), (1, 1), (2, 2), (4, 1), (5, 1)]);
        assert!(method.returns_void().unwrap());
    }

    #[test]
    fn call_footprint() {
        let shape = call_shape(Str(mstr(b"(DI)J"))).unwrap();
        assert_eq!(shape.arguments, vec![2, 1]);
        assert_eq!(shape.return_width, 2);
        assert_eq!(field_width(Str(mstr(b"J"))), 2);
        assert_eq!(field_width(Str(mstr(b"Ljava/lang/Object;"))), 1);
    }
}
