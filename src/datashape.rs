//! Canonical datashape string rendering and a minimal parser covering
//! enough of the grammar to round-trip what `print_datashape` emits:
//! scalar names, `{field: type, ...}` records, and parametrized
//! `name[arg, kw=val]` forms.

use crate::error::{Error, Result};
use crate::type_desc::TypeRef;

/// Renders `tp`'s canonical datashape string. Struct-like types recurse
/// into `{field: type, ...}` form; everything else delegates to the
/// type's own `print_type`, which already produces a valid scalar or
/// parametrized datashape token.
pub fn print_datashape(tp: &TypeRef) -> String {
    match tp.struct_fields() {
        Some(fields) => {
            let rendered: Vec<String> = fields
                .iter()
                .map(|f| format!("{}: {}", f.name, print_datashape(&f.tp)))
                .collect();
            format!("{{{}}}", rendered.join(", "))
        }
        None => format!("{tp:?}"),
    }
}

/// Which bracket pair a parametrized form was written with. `Square` is
/// the existing `name[arg, kw='val']` grammar; `Angle` is
/// `name<arg,arg>`, bare and unquoted — the form `FixedBytesType`'s
/// `fixedbytes<size,alignment>` canonical printing uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bracket {
    Square,
    Angle,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataShape {
    Scalar(String),
    Record(Vec<(String, DataShape)>),
    Parametrized {
        name: String,
        args: Vec<String>,
        kwargs: Vec<(String, String)>,
        bracket: Bracket,
    },
}

struct Parser<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> Parser<'a> {
    fn new(s: &'a str) -> Self {
        Self {
            chars: s.chars().peekable(),
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.chars.peek(), Some(c) if c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn expect(&mut self, c: char) -> Result<()> {
        self.skip_ws();
        match self.chars.next() {
            Some(got) if got == c => Ok(()),
            Some(got) => Err(Error::Value(format!("expected '{c}', found '{got}'"))),
            None => Err(Error::Value(format!("expected '{c}', found end of input"))),
        }
    }

    fn parse_ident(&mut self) -> String {
        self.skip_ws();
        let mut out = String::new();
        while matches!(self.chars.peek(), Some(c) if c.is_alphanumeric() || *c == '_') {
            out.push(self.chars.next().unwrap());
        }
        out
    }

    fn parse_token(&mut self) -> String {
        self.skip_ws();
        let mut out = String::new();
        while matches!(self.chars.peek(), Some(c) if !matches!(c, ',' | ')' | ']' | '}' | '>' | '=')) {
            out.push(self.chars.next().unwrap());
        }
        out.trim().to_string()
    }

    fn parse(&mut self) -> Result<DataShape> {
        self.skip_ws();
        match self.chars.peek() {
            Some('{') => self.parse_record(),
            _ => self.parse_scalar_or_parametrized(),
        }
    }

    fn parse_record(&mut self) -> Result<DataShape> {
        self.expect('{')?;
        let mut fields = Vec::new();
        self.skip_ws();
        if self.chars.peek() != Some(&'}') {
            loop {
                let name = self.parse_ident();
                if name.is_empty() {
                    return Err(Error::Value("expected a field name".into()));
                }
                self.expect(':')?;
                self.skip_ws();
                let field_tp = self.parse()?;
                fields.push((name, field_tp));
                self.skip_ws();
                match self.chars.peek() {
                    Some(',') => {
                        self.chars.next();
                        self.skip_ws();
                    }
                    _ => break,
                }
            }
        }
        self.expect('}')?;
        Ok(DataShape::Record(fields))
    }

    fn parse_scalar_or_parametrized(&mut self) -> Result<DataShape> {
        let name = self.parse_ident();
        if name.is_empty() {
            return Err(Error::Value("expected a type name".into()));
        }
        self.skip_ws();
        let (close, bracket) = match self.chars.peek() {
            Some('[') => (']', Bracket::Square),
            Some('<') => ('>', Bracket::Angle),
            _ => return Ok(DataShape::Scalar(name)),
        };
        self.chars.next();
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        self.skip_ws();
        if self.chars.peek() != Some(&close) {
            loop {
                self.skip_ws();
                let token = self.parse_token();
                self.skip_ws();
                if self.chars.peek() == Some(&'=') {
                    self.chars.next();
                    let value = self.parse_token();
                    kwargs.push((token, value.trim_matches('\'').to_string()));
                } else {
                    args.push(token.trim_matches('\'').to_string());
                }
                self.skip_ws();
                match self.chars.peek() {
                    Some(',') => {
                        self.chars.next();
                    }
                    _ => break,
                }
            }
        }
        self.expect(close)?;
        Ok(DataShape::Parametrized { name, args, kwargs, bracket })
    }
}

/// Parses a datashape string of the forms this crate emits: a bare
/// scalar name, a `name[arg, kw='val']` parametrized form, or a
/// `{field: type, ...}` record, nested arbitrarily.
pub fn parse_datashape(input: &str) -> Result<DataShape> {
    let mut parser = Parser::new(input);
    let result = parser.parse()?;
    parser.skip_ws();
    if parser.chars.next().is_some() {
        return Err(Error::Value("trailing characters after datashape".into()));
    }
    Ok(result)
}

impl std::fmt::Display for DataShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataShape::Scalar(name) => f.write_str(name),
            DataShape::Record(fields) => {
                write!(f, "{{")?;
                for (i, (name, tp)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: {tp}")?;
                }
                write!(f, "}}")
            }
            DataShape::Parametrized { name, args, kwargs, bracket } => {
                let (open, close, sep, quoted) = match bracket {
                    Bracket::Square => ('[', ']', ", ", true),
                    Bracket::Angle => ('<', '>', ",", false),
                };
                write!(f, "{name}{open}")?;
                let mut first = true;
                for arg in args {
                    if !first {
                        write!(f, "{sep}")?;
                    }
                    if quoted {
                        write!(f, "'{arg}'")?;
                    } else {
                        write!(f, "{arg}")?;
                    }
                    first = false;
                }
                for (k, v) in kwargs {
                    if !first {
                        write!(f, "{sep}")?;
                    }
                    if quoted {
                        write!(f, "{k}='{v}'")?;
                    } else {
                        write!(f, "{k}={v}")?;
                    }
                    first = false;
                }
                write!(f, "{close}")
            }
        }
    }
}

fn parse_usize_arg(s: &str) -> Result<usize> {
    s.parse::<usize>()
        .map_err(|_| Error::Value(format!("expected a non-negative integer, found '{s}'")))
}

fn scalar_type_from_name(name: &str) -> Result<TypeRef> {
    use crate::type_desc::{
        make_bool, make_float32, make_float64, make_int16, make_int32, make_int64, make_int8,
        make_uint16, make_uint32, make_uint64, make_uint8, make_void, StringType,
    };
    Ok(match name {
        "bool" => make_bool(),
        "int8" => make_int8(),
        "int16" => make_int16(),
        "int32" => make_int32(),
        "int64" => make_int64(),
        "uint8" => make_uint8(),
        "uint16" => make_uint16(),
        "uint32" => make_uint32(),
        "uint64" => make_uint64(),
        "float32" => make_float32(),
        "float64" => make_float64(),
        "void" => make_void(),
        "string" => StringType::new(),
        "date" => crate::datetime::make_date(),
        "datetime" => crate::datetime::make_datetime(),
        other => return Err(Error::Value(format!("unknown scalar type name '{other}'"))),
    })
}

/// Reconstructs a `TypeRef` from a parsed `DataShape` — the inverse of
/// `print_datashape` for every form it emits. A round trip through
/// `parse_datashape`/`type_from_datashape` is checked by type equality,
/// not string equality, so this has to actually rebuild a type rather
/// than just validate the syntax parsed cleanly.
pub fn type_from_datashape(shape: &DataShape) -> Result<TypeRef> {
    use crate::type_desc::{FixedBytesType, FixedStringType, StructType};
    match shape {
        DataShape::Scalar(name) => scalar_type_from_name(name),
        DataShape::Record(fields) => {
            let named_fields = fields
                .iter()
                .map(|(name, field_shape)| Ok((name.clone(), type_from_datashape(field_shape)?)))
                .collect::<Result<Vec<_>>>()?;
            Ok(StructType::new(named_fields))
        }
        DataShape::Parametrized { name, args, bracket, .. }
            if name == "fixedbytes" && *bracket == Bracket::Angle =>
        {
            if args.len() != 2 {
                return Err(Error::Value(
                    "fixedbytes expects exactly 2 arguments".into(),
                ));
            }
            let size = parse_usize_arg(&args[0])?;
            let alignment = parse_usize_arg(&args[1])?;
            Ok(FixedBytesType::new(size, alignment))
        }
        DataShape::Parametrized { name, args, .. } if name == "fixedstring" => {
            let size = args
                .first()
                .ok_or_else(|| Error::Value("fixedstring expects a size argument".into()))?;
            Ok(FixedStringType::new(parse_usize_arg(size)?))
        }
        DataShape::Parametrized { name, .. } => Err(Error::Value(format!(
            "no type reconstruction for parametrized datashape '{name}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_round_trips_through_display() {
        let shape = parse_datashape("{x: int32, y: string}").unwrap();
        assert_eq!(shape.to_string(), "{x: int32, y: string}");
    }

    #[test]
    fn parametrized_form_round_trips_with_kwarg() {
        let shape = parse_datashape("datetime['min', tz='UTC']").unwrap();
        match &shape {
            DataShape::Parametrized { name, args, kwargs } => {
                assert_eq!(name, "datetime");
                assert_eq!(args, &["min".to_string()]);
                assert_eq!(kwargs, &[("tz".to_string(), "UTC".to_string())]);
            }
            other => panic!("expected a parametrized form, got {other:?}"),
        }
    }

    #[test]
    fn nested_record_parses() {
        let shape = parse_datashape("{outer: {inner: int8}}").unwrap();
        assert_eq!(shape.to_string(), "{outer: {inner: int8}}");
    }

    #[test]
    fn numeric_args_round_trip() {
        let shape = parse_datashape("fixedbytes[16, 4]").unwrap();
        assert_eq!(shape.to_string(), "fixedbytes['16', '4']");
    }

    #[test]
    fn angle_bracketed_form_round_trips_bare_and_unquoted() {
        let shape = parse_datashape("fixedbytes<16,4>").unwrap();
        match &shape {
            DataShape::Parametrized { name, args, bracket, .. } => {
                assert_eq!(name, "fixedbytes");
                assert_eq!(args, &["16".to_string(), "4".to_string()]);
                assert_eq!(*bracket, Bracket::Angle);
            }
            other => panic!("expected a parametrized form, got {other:?}"),
        }
        assert_eq!(shape.to_string(), "fixedbytes<16,4>");
    }

    #[test]
    fn type_from_datashape_reconstructs_the_original_type() {
        use crate::type_desc::{make_int32, FixedBytesType};

        let tp = FixedBytesType::new(16, 4);
        let printed = print_datashape(&tp);
        assert_eq!(printed, "fixedbytes<16,4>");
        let shape = parse_datashape(&printed).unwrap();
        let rebuilt = type_from_datashape(&shape).unwrap();
        assert_eq!(rebuilt, tp);

        let int_shape = parse_datashape("int32").unwrap();
        assert_eq!(type_from_datashape(&int_shape).unwrap(), make_int32());
    }

    #[test]
    fn type_from_datashape_reconstructs_a_record() {
        use crate::type_desc::{make_int32, StructType};

        let tp = StructType::new(vec![("x".into(), make_int32())]);
        let shape = parse_datashape(&print_datashape(&tp)).unwrap();
        let rebuilt = type_from_datashape(&shape).unwrap();
        assert_eq!(rebuilt, tp);
    }
}
