//! Remote sources and defaults shared by the configuration layer and the stages.

pub const DEFAULT_BASE_URL: &str = "https://dadosabertos.ans.gov.br/FTP/PDA/demonstracoes_contabeis/";
pub const DEFAULT_REGISTRY_URL: &str =
    "https://dadosabertos.ans.gov.br/FTP/PDA/operadoras_de_plano_de_saude_ativas/";
pub const DEFAULT_CONFIG_FILE: &str = "pipeline.toml";

/// Accounting code for "Eventos Indenizáveis". Matched exactly so parent and
/// child accounts are never both counted.
pub const DEFAULT_ACCOUNT_CODE: &str = "41";

pub const MIN_YEAR: i32 = 2000;
pub const MAX_YEAR: i32 = 2100;

// Source filing columns
pub const COL_ENTITY_ID: &str = "REG_ANS";
pub const COL_ACCOUNT_CODE: &str = "CD_CONTA_CONTABIL";
pub const COL_CLOSING_BALANCE: &str = "VL_SALDO_FINAL";

// Output columns
pub const HDR_ENTITY_ID: &str = "RegistroANS";
pub const HDR_PERIOD: &str = "Trimestre";
pub const HDR_YEAR: &str = "Ano";
pub const HDR_AMOUNT: &str = "ValorDespesas";
pub const HDR_TAX_ID: &str = "CNPJ";
pub const HDR_LEGAL_NAME: &str = "RazaoSocial";
pub const HDR_CATEGORY: &str = "Modalidade";
pub const HDR_REGION: &str = "UF";
pub const HDR_TOTAL: &str = "TotalDespesas";
pub const HDR_MEAN: &str = "MediaPorTrimestre";
pub const HDR_STD_DEV: &str = "DesvioPadrao";
pub const HDR_SAMPLE_COUNT: &str = "QuantidadeTrimestres";

pub const CONSOLIDATED_HEADER: [&str; 4] = [HDR_ENTITY_ID, HDR_PERIOD, HDR_YEAR, HDR_AMOUNT];
pub const ENRICHED_HEADER: [&str; 8] = [
    HDR_TAX_ID,
    HDR_ENTITY_ID,
    HDR_LEGAL_NAME,
    HDR_CATEGORY,
    HDR_REGION,
    HDR_PERIOD,
    HDR_YEAR,
    HDR_AMOUNT,
];
pub const AGGREGATED_HEADER: [&str; 6] = [
    HDR_LEGAL_NAME,
    HDR_REGION,
    HDR_TOTAL,
    HDR_MEAN,
    HDR_STD_DEV,
    HDR_SAMPLE_COUNT,
];

/// Every file this pipeline writes is `;`-delimited.
pub const OUTPUT_DELIMITER: u8 = b';';

// Output artifacts
pub const CONSOLIDATED_FILE: &str = "consolidado_despesas.csv";
pub const CONSOLIDATED_ARCHIVE: &str = "consolidado_despesas.zip";
pub const VALIDATED_FILE: &str = "consolidado_validado.csv";
pub const ENRICHED_FILE: &str = "consolidado_enriquecido.csv";
pub const AGGREGATED_FILE: &str = "despesas_agregadas.csv";
pub const DEFAULT_BUNDLE_NAME: &str = "resultado_final.zip";
pub const RUN_REPORT_FILE: &str = "run_report.json";
pub const METRICS_FILE: &str = "metrics.prom";

// Record filter heuristics
pub const SUPPORTED_EXTENSIONS: [&str; 4] = ["csv", "txt", "xlsx", "xls"];
pub const EXPENSE_KEYWORDS: [&str; 6] = ["despesa", "sinistro", "evento", "4t", "diops", "assistencia"];
pub const HEADER_KEYWORDS: [&str; 5] = ["despesa", "sinistro", "evento", "vl_saldo_final", "valor"];

// Registry
pub const REGISTRY_MARKER_TOKENS: [&str; 2] = ["relatorio", "cadop"];
pub const UNMATCHED_LEGAL_NAME: &str = "OPERADORA NÃO ENCONTRADA";
pub const MISSING_REGION: &str = "N/A";

pub const FALLBACK_PERIOD: &str = "Q1";
