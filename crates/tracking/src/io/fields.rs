//! Self-describing per-particle field objects.
//!
//! Every object file starts with one header line,
//!
//! ```text
//! # <object> <class> <format> <count>
//! ```
//!
//! followed by the body. ASCII bodies are a list: the count, `(`, one value
//! per line (vectors as `(x y z)`), `)`. Binary bodies are the raw values.
//! The `positions` object has class `positions` and a particle-record body
//! without components.

use std::fs;
use std::path::Path;

use crate::barycentric::Vector;
use crate::error::WireError;
use crate::io::{wire, WriteFormat};
use crate::particle::Particle;

/// Class name of the positions object.
pub const POSITIONS_CLASS: &str = "positions";

/// Values of one field, one per particle.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    /// Real values.
    Scalar(Vec<f64>),
    /// Vector values.
    Vector(Vec<Vector>),
    /// Integer values.
    Label(Vec<i64>),
}

impl Field {
    /// Class name written in the header.
    pub fn class_name(&self) -> &'static str {
        match self {
            Field::Scalar(_) => "scalarField",
            Field::Vector(_) => "vectorField",
            Field::Label(_) => "labelField",
        }
    }

    /// Number of values.
    pub fn len(&self) -> usize {
        match self {
            Field::Scalar(v) => v.len(),
            Field::Vector(v) => v.len(),
            Field::Label(v) => v.len(),
        }
    }

    /// Whether the field has no values.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Values at `indices`, in that order.
    pub fn select(&self, indices: &[usize]) -> Field {
        match self {
            Field::Scalar(v) => Field::Scalar(indices.iter().map(|&i| v[i]).collect()),
            Field::Vector(v) => Field::Vector(indices.iter().map(|&i| v[i]).collect()),
            Field::Label(v) => Field::Label(indices.iter().map(|&i| v[i]).collect()),
        }
    }

    /// Empty field of the same class.
    pub fn empty_like(&self) -> Field {
        match self {
            Field::Scalar(_) => Field::Scalar(Vec::new()),
            Field::Vector(_) => Field::Vector(Vec::new()),
            Field::Label(_) => Field::Label(Vec::new()),
        }
    }

    /// Append the values of a field of the same class. Returns false on a
    /// class mismatch.
    pub fn extend(&mut self, other: &Field) -> bool {
        match (self, other) {
            (Field::Scalar(a), Field::Scalar(b)) => a.extend_from_slice(b),
            (Field::Vector(a), Field::Vector(b)) => a.extend_from_slice(b),
            (Field::Label(a), Field::Label(b)) => a.extend_from_slice(b),
            _ => return false,
        }
        true
    }
}

/// Contents of an object file.
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    /// Particle records without components.
    Positions(Vec<Particle>),
    /// A per-particle field.
    Field(Field),
}

impl Object {
    /// Number of entries.
    pub fn len(&self) -> usize {
        match self {
            Object::Positions(p) => p.len(),
            Object::Field(f) => f.len(),
        }
    }

    /// Whether the object has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parsed header line.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectHeader {
    /// Object name.
    pub object: String,
    /// Class name.
    pub class: String,
    /// Body encoding.
    pub format: WriteFormat,
    /// Number of entries.
    pub count: usize,
}

fn header_line(object: &str, class: &str, format: WriteFormat, count: usize) -> String {
    format!("# {} {} {} {}\n", object, class, format, count)
}

fn parse_header(line: &str) -> Result<ObjectHeader, WireError> {
    let malformed = |reason: String| WireError::Malformed {
        position: 1,
        reason,
    };
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() != 5 || tokens[0] != "#" {
        return Err(malformed(format!("bad object header '{}'", line)));
    }
    Ok(ObjectHeader {
        object: tokens[1].to_string(),
        class: tokens[2].to_string(),
        format: tokens[3].parse().map_err(malformed)?,
        count: tokens[4]
            .parse()
            .map_err(|_| malformed(format!("bad count '{}'", tokens[4])))?,
    })
}

/// Split an object file into its header and body.
fn split_object(bytes: &[u8]) -> Result<(ObjectHeader, &[u8]), WireError> {
    let end = bytes
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| WireError::Malformed {
            position: 1,
            reason: "missing object header".into(),
        })?;
    let line = std::str::from_utf8(&bytes[..end]).map_err(|e| WireError::Malformed {
        position: 1,
        reason: e.to_string(),
    })?;
    Ok((parse_header(line)?, &bytes[end + 1..]))
}

fn ascii_list<T: std::fmt::Display>(values: &[T]) -> String {
    let mut out = format!("{}\n(\n", values.len());
    for v in values {
        out.push_str(&v.to_string());
        out.push('\n');
    }
    out.push_str(")\n");
    out
}

fn encode_body(field: &Field, format: WriteFormat) -> Vec<u8> {
    match (field, format) {
        (Field::Scalar(v), WriteFormat::Binary) => bytemuck::cast_slice(v).to_vec(),
        (Field::Label(v), WriteFormat::Binary) => bytemuck::cast_slice(v).to_vec(),
        (Field::Vector(v), WriteFormat::Binary) => {
            let flat: Vec<[f64; 3]> = v.iter().map(|x| [x.x, x.y, x.z]).collect();
            bytemuck::cast_slice(&flat).to_vec()
        }
        (Field::Scalar(v), WriteFormat::Ascii) => ascii_list(v).into_bytes(),
        (Field::Label(v), WriteFormat::Ascii) => ascii_list(v).into_bytes(),
        (Field::Vector(v), WriteFormat::Ascii) => {
            let text: Vec<String> = v
                .iter()
                .map(|x| format!("({} {} {})", x.x, x.y, x.z))
                .collect();
            ascii_list(&text).into_bytes()
        }
    }
}

fn binary_values<T: bytemuck::Pod>(
    body: &[u8],
    count: usize,
    what: &'static str,
) -> Result<Vec<T>, WireError> {
    let size = std::mem::size_of::<T>();
    let needed = count.checked_mul(size).ok_or_else(|| WireError::Malformed {
        position: 1,
        reason: format!("{} {} do not fit in memory", count, what),
    })?;
    if body.len() != needed {
        return Err(WireError::Truncated {
            what,
            needed,
            available: body.len(),
        });
    }
    Ok(body.chunks_exact(size).map(bytemuck::pod_read_unaligned).collect())
}

fn ascii_values(body: &[u8], count: usize) -> Result<Vec<String>, WireError> {
    let text = std::str::from_utf8(body).map_err(|e| WireError::Malformed {
        position: 2,
        reason: e.to_string(),
    })?;
    // Line numbers count the header
    let lines: Vec<(usize, &str)> = text
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 2, l.trim()))
        .filter(|(_, l)| !l.is_empty())
        .collect();
    let malformed = |position: usize, reason: &str| WireError::Malformed {
        position,
        reason: reason.to_string(),
    };
    if count.checked_add(3) != Some(lines.len()) {
        return Err(malformed(2, "list length does not match its count"));
    }
    if lines[0].1.parse::<usize>().ok() != Some(count) {
        return Err(malformed(lines[0].0, "list count does not match the header"));
    }
    if lines[1].1 != "(" || lines[count + 2].1 != ")" {
        return Err(malformed(lines[1].0, "list is not enclosed in parentheses"));
    }
    Ok(lines[2..count + 2].iter().map(|(_, l)| l.to_string()).collect())
}

fn parse_value<T: std::str::FromStr>(s: &str, i: usize) -> Result<T, WireError> {
    s.parse().map_err(|_| WireError::Malformed {
        position: i + 4,
        reason: format!("cannot parse '{}'", s),
    })
}

fn decode_field(header: &ObjectHeader, body: &[u8]) -> Result<Field, WireError> {
    let n = header.count;
    match (header.class.as_str(), header.format) {
        ("scalarField", WriteFormat::Binary) => Ok(Field::Scalar(binary_values(body, n, "scalars")?)),
        ("labelField", WriteFormat::Binary) => Ok(Field::Label(binary_values(body, n, "labels")?)),
        ("vectorField", WriteFormat::Binary) => {
            let flat: Vec<[f64; 3]> = binary_values(body, n, "vectors")?;
            Ok(Field::Vector(flat.into_iter().map(|a| Vector::new(a[0], a[1], a[2])).collect()))
        }
        ("scalarField", WriteFormat::Ascii) => {
            let values = ascii_values(body, n)?;
            let parsed = values
                .iter()
                .enumerate()
                .map(|(i, s)| parse_value(s, i))
                .collect::<Result<_, _>>()?;
            Ok(Field::Scalar(parsed))
        }
        ("labelField", WriteFormat::Ascii) => {
            let values = ascii_values(body, n)?;
            let parsed = values
                .iter()
                .enumerate()
                .map(|(i, s)| parse_value(s, i))
                .collect::<Result<_, _>>()?;
            Ok(Field::Label(parsed))
        }
        ("vectorField", WriteFormat::Ascii) => {
            let values = ascii_values(body, n)?;
            let mut parsed = Vec::with_capacity(n);
            for (i, s) in values.iter().enumerate() {
                let parts: Vec<&str> = s
                    .trim_start_matches('(')
                    .trim_end_matches(')')
                    .split_whitespace()
                    .collect();
                if parts.len() != 3 {
                    return Err(WireError::Malformed {
                        position: i + 4,
                        reason: format!("expected a vector, found '{}'", s),
                    });
                }
                parsed.push(Vector::new(
                    parse_value(parts[0], i)?,
                    parse_value(parts[1], i)?,
                    parse_value(parts[2], i)?,
                ));
            }
            Ok(Field::Vector(parsed))
        }
        (class, _) => Err(WireError::Malformed {
            position: 1,
            reason: format!("unknown object class '{}'", class),
        }),
    }
}

/// Encode an object file.
pub fn encode_object(name: &str, object: &Object, format: WriteFormat) -> Vec<u8> {
    match object {
        Object::Positions(particles) => {
            let mut out =
                header_line(name, POSITIONS_CLASS, format, particles.len()).into_bytes();
            match format {
                WriteFormat::Ascii => out.extend(wire::encode_ascii(particles, false).into_bytes()),
                WriteFormat::Binary => out.extend(wire::encode_binary(particles, false)),
            }
            out
        }
        Object::Field(field) => {
            let mut out = header_line(name, field.class_name(), format, field.len()).into_bytes();
            out.extend(encode_body(field, format));
            out
        }
    }
}

/// Decode an object file into its name and contents.
pub fn decode_object(bytes: &[u8]) -> Result<(String, Object), WireError> {
    let (header, body) = split_object(bytes)?;
    let object = if header.class == POSITIONS_CLASS {
        let particles = match header.format {
            WriteFormat::Ascii => {
                let text = std::str::from_utf8(body).map_err(|e| WireError::Malformed {
                    position: 2,
                    reason: e.to_string(),
                })?;
                wire::decode_ascii(text, false)?
            }
            WriteFormat::Binary => wire::decode_binary(body, false)?,
        };
        Object::Positions(particles)
    } else {
        Object::Field(decode_field(&header, body)?)
    };
    Ok((header.object, object))
}

/// Write an object file.
pub fn write_object(
    path: &Path,
    name: &str,
    object: &Object,
    format: WriteFormat,
) -> Result<(), WireError> {
    fs::write(path, encode_object(name, object, format))?;
    Ok(())
}

/// Read an object file.
pub fn read_object(path: &Path) -> Result<(String, Object), WireError> {
    decode_object(&fs::read(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_vector_field() {
        let field = Field::Vector(vec![Vector::new(1.0, -0.5, 0.1), Vector::new(0.0, 0.0, 3.0)]);
        let bytes = encode_object("U", &Object::Field(field.clone()), WriteFormat::Ascii);
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.starts_with("# U vectorField ascii 2\n2\n(\n(1 -0.5 0.1)\n"));
        let (name, back) = decode_object(&bytes).unwrap();
        assert_eq!(name, "U");
        assert_eq!(back, Object::Field(field));
    }

    #[test]
    fn test_binary_label_field() {
        let field = Field::Label(vec![3, -1, 7]);
        let bytes = encode_object("typeId", &Object::Field(field.clone()), WriteFormat::Binary);
        let (_, back) = decode_object(&bytes).unwrap();
        assert_eq!(back, Object::Field(field));
    }

    #[test]
    fn test_count_mismatch() {
        let text = b"# d scalarField ascii 3\n2\n(\n1\n2\n)\n";
        assert!(decode_object(text).is_err());
    }

    #[test]
    fn test_oversized_header_count() {
        let binary = format!("# d scalarField binary {}\n", usize::MAX);
        let mut bytes = binary.into_bytes();
        bytes.extend_from_slice(&1.0_f64.to_ne_bytes());
        let err = decode_object(&bytes).unwrap_err();
        assert!(matches!(err, WireError::Malformed { .. }));

        let ascii = format!("# d scalarField ascii {}\n1\n(\n1\n)\n", usize::MAX);
        assert!(decode_object(ascii.as_bytes()).is_err());
    }

    #[test]
    fn test_select_and_extend() {
        let f = Field::Scalar(vec![0.0, 1.0, 2.0, 3.0]);
        let mut g = f.select(&[3, 1]);
        assert_eq!(g, Field::Scalar(vec![3.0, 1.0]));
        assert!(g.extend(&Field::Scalar(vec![9.0])));
        assert_eq!(g.len(), 3);
        assert!(!g.extend(&Field::Label(vec![1])));
    }
}
