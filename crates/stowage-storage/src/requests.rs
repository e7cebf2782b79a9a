use stowage_metadata::ObjectMetadataPatch;

#[derive(Debug, Clone)]
pub struct GetObjectRequest {
    pub bucket: String,
    pub object: String,
    pub authorization: Option<String>,
    pub download_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DeleteObjectRequest {
    pub bucket: String,
    pub object: String,
    pub authorization: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UpdateObjectMetadataRequest {
    pub bucket: String,
    pub object: String,
    pub metadata: ObjectMetadataPatch,
    pub authorization: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CopyObjectRequest {
    pub source_bucket: String,
    pub source_object: String,
    pub destination_bucket: String,
    pub destination_object: String,
    /// Overrides for the destination. A custom metadata map here replaces
    /// the source's map and download tokens.
    pub metadata: ObjectMetadataPatch,
    pub authorization: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ListObjectsRequest {
    pub bucket: String,
    pub prefix: String,
    pub delimiter: String,
    pub page_token: Option<String>,
    pub max_results: Option<usize>,
    pub authorization: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreateDownloadTokenRequest {
    pub bucket: String,
    pub object: String,
    pub authorization: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DeleteDownloadTokenRequest {
    pub bucket: String,
    pub object: String,
    pub token: String,
    pub authorization: Option<String>,
}
