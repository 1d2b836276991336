mod canonical;
mod classifier;
mod extractor;
mod fragment;
mod pipeline;
mod tracker;

pub use canonical::{
    CanonicalEntityIndex, Canonicalization, Canonicalizer, ChunkOutcome, ChunkScope,
};
pub use classifier::{Classification, ClassifiedFragment, FragmentClassifier};
pub use extractor::{
    parse_extraction_response, validate_extraction, ExtractedEdge, ExtractedGraph,
    ExtractedNode, ExtractionError, ExtractionResult, Extractor, RecordedExtractor, Rejection,
};
pub use fragment::{read_fragments, Fragment, SourceLocator};
pub use pipeline::{
    document_id_for, DocumentMeta, IngestError, IngestPipeline, IngestResult, RootSeed,
    SourceDocument,
};
pub use tracker::{run_structural_pass, HierarchyTracker, ParseContext, StructuralOutput};
