//! JSON bodies returned by the file endpoints.

use serde::Serialize;

/// Response to a successful upload.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct UploadResponse {
    /// Folder path the blob was placed under, e.g. `Amauri/Images`.
    pub pasta_destino: String,
    pub tipo_arquivo: String,
    pub nome_blob: String,
    pub uri: String,
    #[serde(rename = "ETag")]
    pub etag: String,
    pub last_modified: String,
}

/// One row of the listing endpoint.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct BlobEntry {
    pub nome: String,
    pub tipo: String,
    pub uri: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn upload_response_field_names() {
        let body = UploadResponse {
            pasta_destino: "Amauri/Images".into(),
            tipo_arquivo: "image/png".into(),
            nome_blob: "Amauri/Images/a.png".into(),
            uri: "http://host/c/Amauri/Images/a.png".into(),
            etag: "\"1\"".into(),
            last_modified: "2025-01-01T00:00:00.000Z".into(),
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({
                "PastaDestino": "Amauri/Images",
                "TipoArquivo": "image/png",
                "NomeBlob": "Amauri/Images/a.png",
                "Uri": "http://host/c/Amauri/Images/a.png",
                "ETag": "\"1\"",
                "LastModified": "2025-01-01T00:00:00.000Z"
            })
        );
    }

    #[test]
    fn blob_entry_field_names() {
        let entry = BlobEntry {
            nome: "k".into(),
            tipo: "t".into(),
            uri: "u".into(),
        };
        assert_eq!(
            serde_json::to_value(&entry).unwrap(),
            json!({"Nome": "k", "Tipo": "t", "Uri": "u"})
        );
    }
}
