use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

/// Fixed-width column types; enough surface for key extraction, which is
/// all the storage core needs from the type system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Int,
    BigInt,
}

impl DataType {
    pub fn width(&self) -> usize {
        match self {
            DataType::Int => 4,
            DataType::BigInt => 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    name: String,
    data_type: DataType,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name() == name)
    }

    /// Byte offset of column `index` inside a tuple.
    pub fn column_offset(&self, index: usize) -> usize {
        self.columns[..index]
            .iter()
            .map(|c| c.data_type().width())
            .sum()
    }

    pub fn tuple_width(&self) -> usize {
        self.column_offset(self.columns.len())
    }

    /// The schema of an index key over `key_attrs`.
    pub fn project(&self, key_attrs: &[usize]) -> Schema {
        Schema::new(
            key_attrs
                .iter()
                .map(|&i| self.columns[i].clone())
                .collect(),
        )
    }

    /// Total width of a key over `key_attrs`.
    pub fn key_size(&self, key_attrs: &[usize]) -> usize {
        key_attrs
            .iter()
            .map(|&i| self.columns[i].data_type().width())
            .sum()
    }
}

/// A row image in the fixed-width layout `Schema` describes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tuple {
    data: Vec<u8>,
}

impl Tuple {
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Encode integer column values in schema order.
    pub fn from_values(schema: &Schema, values: &[i64]) -> Self {
        let mut data = vec![0u8; schema.tuple_width()];
        for (i, column) in schema.columns().iter().enumerate() {
            let offset = schema.column_offset(i);
            match column.data_type() {
                DataType::Int => {
                    LittleEndian::write_i32(&mut data[offset..offset + 4], values[i] as i32)
                }
                DataType::BigInt => {
                    LittleEndian::write_i64(&mut data[offset..offset + 8], values[i])
                }
            }
        }
        Self { data }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn value_at(&self, schema: &Schema, index: usize) -> i64 {
        let offset = schema.column_offset(index);
        match schema.columns()[index].data_type() {
            DataType::Int => LittleEndian::read_i32(&self.data[offset..offset + 4]) as i64,
            DataType::BigInt => LittleEndian::read_i64(&self.data[offset..offset + 8]),
        }
    }

    /// Project this tuple onto an index key: the key columns' bytes,
    /// concatenated in `key_attrs` order.
    pub fn key_from_tuple(&self, schema: &Schema, key_attrs: &[usize]) -> Tuple {
        let mut data = Vec::with_capacity(schema.key_size(key_attrs));
        for &attr in key_attrs {
            let offset = schema.column_offset(attr);
            let width = schema.columns()[attr].data_type().width();
            data.extend_from_slice(&self.data[offset..offset + width]);
        }
        Tuple { data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orders_schema() -> Schema {
        Schema::new(vec![
            Column::new("id", DataType::BigInt),
            Column::new("customer", DataType::Int),
            Column::new("amount", DataType::BigInt),
        ])
    }

    #[test]
    fn test_offsets_and_width() {
        let schema = orders_schema();
        assert_eq!(schema.column_offset(0), 0);
        assert_eq!(schema.column_offset(1), 8);
        assert_eq!(schema.column_offset(2), 12);
        assert_eq!(schema.tuple_width(), 20);
    }

    #[test]
    fn test_tuple_round_trip() {
        let schema = orders_schema();
        let tuple = Tuple::from_values(&schema, &[7, -3, 1_000_000]);

        assert_eq!(tuple.value_at(&schema, 0), 7);
        assert_eq!(tuple.value_at(&schema, 1), -3);
        assert_eq!(tuple.value_at(&schema, 2), 1_000_000);
    }

    #[test]
    fn test_key_projection() {
        let schema = orders_schema();
        let tuple = Tuple::from_values(&schema, &[7, 3, 42]);

        let key = tuple.key_from_tuple(&schema, &[0]);
        assert_eq!(key.data().len(), 8);
        let key_schema = schema.project(&[0]);
        assert_eq!(key.value_at(&key_schema, 0), 7);
    }
}
