use std::{
    io::Cursor,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use docx_rs::{Docx, Paragraph, Run};
use httpmock::{Method::POST, MockServer};
use lopdf::{
    Document, Object, Stream,
    content::{Content, Operation},
    dictionary,
};
use rustyclaims::{
    embedding::HashingEmbeddingClient,
    llm::{LanguageModel, LanguageModelError, OllamaLanguageModel},
    processing::{
        DecisionOutcome, Pipeline, PipelineError, PipelineSettings, PipelineStage, UploadedFile,
    },
};
use serde_json::json;

const KNEE_CLAUSE: &str = "Knee surgery is covered after 90 days of policy inception.";
const DENTAL_CLAUSE: &str = "Dental treatment is excluded from this policy.";

/// Build a one-page PDF with one text line per entry.
fn policy_pdf(lines: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut operations = vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["F1".into(), 11.into()]),
        Operation::new("Td", vec![50.into(), 780.into()]),
    ];
    for line in lines {
        operations.push(Operation::new("Tj", vec![Object::string_literal(*line)]));
        operations.push(Operation::new("Td", vec![0.into(), (-24).into()]));
    }
    operations.push(Operation::new("ET", vec![]));
    let content = Content { operations };

    let content_id = doc.add_object(Stream::new(
        dictionary! {},
        content.encode().expect("encode content"),
    ));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
    });
    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => vec![page_id.into()],
        "Count" => 1,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("save pdf");
    bytes
}

fn endorsement_docx(paragraphs: &[&str]) -> Vec<u8> {
    let mut docx = Docx::new();
    for text in paragraphs {
        docx = docx.add_paragraph(Paragraph::new().add_run(Run::new().add_text(*text)));
    }
    let mut buffer = Cursor::new(Vec::new());
    docx.build().pack(&mut buffer).expect("pack docx");
    buffer.into_inner()
}

fn correspondence_eml(body: &str) -> Vec<u8> {
    format!(
        "From: insurer@example.org\r\n\
         To: claimant@example.org\r\n\
         Subject: Network hospitals\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         \r\n\
         {body}\r\n"
    )
    .into_bytes()
}

fn extraction_for(months: f64) -> String {
    json!({
        "age": 46,
        "gender": "male",
        "procedure": "knee surgery",
        "location": "Pune",
        "policyDurationMonths": months,
    })
    .to_string()
}

/// Answers extraction prompts with a fixed payload and decides the knee-surgery waiting period
/// from the clauses and policy duration it is shown.
struct WaitingPeriodModel {
    extraction: String,
    calls: AtomicUsize,
}

impl WaitingPeriodModel {
    fn new(extraction: String) -> Self {
        Self {
            extraction,
            calls: AtomicUsize::new(0),
        }
    }

    fn decide(prompt: &str) -> String {
        let months: Option<f64> = prompt
            .lines()
            .find_map(|line| line.strip_prefix("Policy Duration (months): "))
            .and_then(|value| value.trim().parse().ok());
        let cited = prompt
            .lines()
            .find(|line| line.contains("Knee surgery is covered after 90 days"));

        let (decision, clauses) = match (months, cited) {
            (Some(months), Some(line)) if months * 30.0 >= 90.0 => ("approved", vec![line]),
            (Some(_), Some(line)) => ("denied", vec![line]),
            _ => ("insufficient_information", Vec::new()),
        };
        json!({
            "decision": decision,
            "amount": null,
            "justification": "Evaluated the 90-day waiting period for knee surgery.",
            "clauses": clauses,
        })
        .to_string()
    }
}

#[async_trait]
impl LanguageModel for WaitingPeriodModel {
    async fn complete(&self, prompt: &str) -> Result<String, LanguageModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if prompt.contains("You extract facts") {
            Ok(self.extraction.clone())
        } else {
            Ok(Self::decide(prompt))
        }
    }
}

fn pipeline_with(model: Arc<dyn LanguageModel>) -> Pipeline {
    Pipeline::new(
        model,
        Arc::new(HashingEmbeddingClient::new(256)),
        PipelineSettings::default(),
    )
}

#[tokio::test]
async fn knee_surgery_after_waiting_period_is_approved() {
    let model = Arc::new(WaitingPeriodModel::new(extraction_for(3.1)));
    let pipeline = pipeline_with(model.clone());

    let decision = pipeline
        .run_pipeline(
            "46-year-old male, knee surgery in Pune, policy active for a little over 3 months",
            vec![UploadedFile::new(
                "policy.pdf",
                policy_pdf(&[KNEE_CLAUSE, DENTAL_CLAUSE]),
            )],
        )
        .await
        .expect("decision");

    assert_eq!(decision.decision, DecisionOutcome::Approved);
    assert_eq!(decision.clauses.len(), 1);
    assert!(decision.clauses[0].contains("Knee surgery is covered after 90 days"));
    assert_eq!(model.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn knee_surgery_inside_waiting_period_is_denied() {
    let model = Arc::new(WaitingPeriodModel::new(extraction_for(2.9)));
    let pipeline = pipeline_with(model);

    let decision = pipeline
        .run_pipeline(
            "46-year-old male, knee surgery in Pune, policy active for just under 3 months",
            vec![UploadedFile::new(
                "policy.pdf",
                policy_pdf(&[DENTAL_CLAUSE, KNEE_CLAUSE]),
            )],
        )
        .await
        .expect("decision");

    assert_eq!(decision.decision, DecisionOutcome::Denied);
    assert!(decision.clauses[0].contains("Knee surgery is covered after 90 days"));
}

#[tokio::test]
async fn mixed_batch_skips_unsupported_files_and_grounds_in_all_formats() {
    let model = Arc::new(WaitingPeriodModel::new(extraction_for(12.0)));
    let pipeline = pipeline_with(model);

    let files = vec![
        UploadedFile::new("notes.txt", "Knee surgery is always covered."),
        UploadedFile::new(
            "endorsement.docx",
            endorsement_docx(&["Endorsement 7", KNEE_CLAUSE]),
        ),
        UploadedFile::new(
            "correspondence.eml",
            correspondence_eml("Treatment in Pune network hospitals is cashless."),
        ),
        UploadedFile::new("schedule.pdf", policy_pdf(&[DENTAL_CLAUSE])),
    ];

    let decision = pipeline
        .run_pipeline("knee surgery in Pune, one-year policy", files)
        .await
        .expect("decision");

    assert_eq!(decision.decision, DecisionOutcome::Approved);
    assert_eq!(decision.clauses, vec![KNEE_CLAUSE.to_string()]);

    let snapshot = pipeline.metrics_snapshot();
    assert_eq!(snapshot.documents_parsed, 3);
    assert_eq!(snapshot.documents_empty, 0);
    assert!(snapshot.chunks_embedded >= 3);
}

#[tokio::test]
async fn unreadable_documents_yield_insufficient_information() {
    let model = Arc::new(WaitingPeriodModel::new(extraction_for(6.0)));
    let pipeline = pipeline_with(model.clone());

    let decision = pipeline
        .run_pipeline(
            "knee surgery in Pune",
            vec![
                UploadedFile::new("policy.pdf", b"%PDF-1.7 truncated".to_vec()),
                UploadedFile::new("endorsement.docx", b"not a zip archive".to_vec()),
            ],
        )
        .await
        .expect("decision");

    assert_eq!(decision.decision, DecisionOutcome::InsufficientInformation);
    assert!(decision.clauses.is_empty());
    assert_eq!(model.calls.load(Ordering::SeqCst), 1);

    let snapshot = pipeline.metrics_snapshot();
    assert_eq!(snapshot.documents_parsed, 2);
    assert_eq!(snapshot.documents_empty, 2);
    assert_eq!(snapshot.insufficient_information, 1);
}

#[tokio::test]
async fn ollama_backed_pipeline_runs_end_to_end() {
    let server = MockServer::start_async().await;
    let extraction = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/generate")
                .body_contains("You extract facts");
            then.status(200).json_body(json!({
                "response": extraction_for(4.0),
                "done": true,
            }));
        })
        .await;
    let synthesis = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/generate")
                .body_contains("policy decision engine");
            then.status(200).json_body(json!({
                "response": "```json\n{\"decision\": \"approved\", \"amount\": 150000, \"justification\": \"Clause 1 applies.\", \"clauses\": [\"Clause 1\", \"Pre-existing conditions are excluded.\"]}\n```",
                "done": true,
            }));
        })
        .await;

    let model = OllamaLanguageModel::new(
        server.base_url(),
        "llama3.1".into(),
        Duration::from_secs(5),
    )
    .expect("client");
    let pipeline = pipeline_with(Arc::new(model));

    let decision = pipeline
        .run_pipeline(
            "46M knee surgery Pune, 4 month policy",
            vec![UploadedFile::new(
                "letter.eml",
                correspondence_eml(KNEE_CLAUSE),
            )],
        )
        .await
        .expect("decision");

    extraction.assert_async().await;
    synthesis.assert_async().await;
    assert_eq!(decision.decision, DecisionOutcome::Approved);
    assert_eq!(decision.amount, Some(150000.0));
    assert_eq!(decision.clauses, vec![KNEE_CLAUSE.to_string()]);
}

#[tokio::test]
async fn malformed_extraction_is_surfaced_with_raw_output() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/generate")
                .body_contains("You extract facts");
            then.status(200).json_body(json!({
                "response": "The claimant is a 46 year old man.",
                "done": true,
            }));
        })
        .await;
    let synthesis = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/generate")
                .body_contains("policy decision engine");
            then.status(200).json_body(json!({ "response": "{}", "done": true }));
        })
        .await;

    let model = OllamaLanguageModel::new(
        server.base_url(),
        "llama3.1".into(),
        Duration::from_secs(5),
    )
    .expect("client");
    let pipeline = pipeline_with(Arc::new(model));

    let error = pipeline
        .run_pipeline(
            "46M knee surgery",
            vec![UploadedFile::new("letter.eml", correspondence_eml(KNEE_CLAUSE))],
        )
        .await
        .expect_err("malformed extraction");

    match &error {
        PipelineError::MalformedExtraction { raw, .. } => {
            assert_eq!(raw, "The claimant is a 46 year old man.");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(error.stage(), PipelineStage::Structuring);
    synthesis.assert_hits_async(0).await;
    assert_eq!(pipeline.metrics_snapshot().failures, 1);
}

#[tokio::test]
async fn unreachable_model_is_reported_as_unavailable() {
    let model = OllamaLanguageModel::new(
        "http://127.0.0.1:9".into(),
        "llama3.1".into(),
        Duration::from_secs(2),
    )
    .expect("client");
    let pipeline = pipeline_with(Arc::new(model));

    let error = pipeline
        .run_pipeline("knee surgery", Vec::new())
        .await
        .expect_err("unavailable");

    assert!(
        matches!(
            error,
            PipelineError::LanguageModelUnavailable {
                stage: PipelineStage::Structuring,
                ..
            } | PipelineError::CapabilityTimeout {
                stage: PipelineStage::Structuring,
                ..
            }
        ),
        "unexpected error: {error:?}"
    );
}
