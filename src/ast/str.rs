use core::fmt;
use noak::MStr;

/// A class, member or descriptor name borrowed from the constant pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Str<'code>(pub &'code MStr);

impl<'code> Str<'code> {
    pub fn is_constructor_name(&self) -> bool {
        self.0 == "<init>"
    }

    /// Displays an internal class name (`java/lang/Object`) in source form (`java.lang.Object`).
    pub fn dotted(self) -> Dotted<'code> {
        Dotted(self)
    }
}

impl fmt::Display for Str<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

pub struct Dotted<'code>(Str<'code>);

impl fmt::Display for Dotted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, part) in self.0.to_string().split('/').enumerate() {
            if index > 0 {
                f.write_str(".")?;
            }
            f.write_str(part)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Str;
    use noak::MStr;

    #[test]
    fn package_separators_become_dots() {
        let name = MStr::from_mutf8(b"java/lang/Object").unwrap();
        assert_eq!(Str(name).dotted().to_string(), "java.lang.Object");
        assert!(!Str(name).is_constructor_name());
    }
}
