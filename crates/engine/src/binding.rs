use crate::table::EmbeddingTable;
use crate::{blake3_hex, jcs_bytes};
use serde::Serialize;

#[derive(Serialize)]
struct CanonicalInputs<'a> {
    v: u8,
    table: &'a EmbeddingTable,
}

/// Identifies a parsed input table independently of its source format:
/// a CSV and a JSONL file with the same rows hash the same.
pub fn compute_inputs_hash(table: &EmbeddingTable) -> Result<String, serde_json::Error> {
    let bytes = jcs_bytes(&CanonicalInputs { v: 1, table })?;
    Ok(blake3_hex(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{read_table, TableFormat};

    #[test]
    fn csv_and_jsonl_hash_alike() {
        let csv = "sample,dataset,PC1,PC2\nA1,CCLE,1.0,2\nB1,TCGA,0.5,-1\n";
        let jsonl = concat!(
            "{\"sample\":\"A1\",\"dataset\":\"CCLE\",\"PC1\":1,\"PC2\":2.0}\n",
            "{\"sample\":\"B1\",\"dataset\":\"TCGA\",\"PC1\":0.5,\"PC2\":-1}\n",
        );
        let a = read_table(csv.as_bytes(), TableFormat::Csv, "PC").expect("csv");
        let b = read_table(jsonl.as_bytes(), TableFormat::Jsonl, "PC").expect("jsonl");
        assert_eq!(
            compute_inputs_hash(&a).expect("hash"),
            compute_inputs_hash(&b).expect("hash")
        );
    }

    #[test]
    fn hash_changes_with_values() {
        let a = read_table("sample,dataset,PC1\nA,X,1\n".as_bytes(), TableFormat::Csv, "PC")
            .expect("a");
        let b = read_table("sample,dataset,PC1\nA,X,2\n".as_bytes(), TableFormat::Csv, "PC")
            .expect("b");
        let ha = compute_inputs_hash(&a).expect("hash");
        assert_eq!(ha.len(), 64);
        assert_ne!(ha, compute_inputs_hash(&b).expect("hash"));
    }
}
