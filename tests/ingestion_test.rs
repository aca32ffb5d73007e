mod common;

use ans_pipeline::pipeline::ingestion::{ArchiveFetcher, PeriodDiscovery};
use ans_pipeline::pipeline::processing::consolidate::Consolidator;
use common::{listing, zip_bytes, FakeHttp};
use tempfile::tempdir;

const BASE: &str = "http://ans.test/demonstracoes_contabeis/";

fn mirror() -> FakeHttp {
    FakeHttp::default()
        .with_page(BASE, &listing(&["2022/", "2023/", "2024/", "leiame.txt"]))
        .with_page(
            &format!("{}2023/", BASE),
            &listing(&["1T2023.zip", "2T2023.zip", "3T2023.zip", "4T2023.zip"]),
        )
        .with_page(&format!("{}2024/", BASE), &listing(&["1t2024.zip", "2T2024.ZIP"]))
    // 2022/ has no page: that year fails and contributes nothing
}

#[test]
fn test_discovery_orders_most_recent_first() {
    let http = mirror();
    let discovery = PeriodDiscovery::new(&http, BASE);

    let (periods, stats) = discovery.latest_periods(3).unwrap();
    let ids: Vec<String> = periods.iter().map(|p| p.period.identifier()).collect();
    assert_eq!(ids, vec!["2024/2T", "2024/1T", "2023/4T"]);
    assert_eq!(periods[0].url, format!("{}2024/2T2024.ZIP", BASE));
    assert_eq!(stats.years_listed, 3);
    assert_eq!(stats.year_failures, 1);
    assert_eq!(stats.periods_found, 6);
}

#[test]
fn test_discovery_returns_all_when_fewer_exist() {
    let http = mirror();
    let ids = PeriodDiscovery::new(&http, BASE).latest_identifiers(50).unwrap();
    assert_eq!(ids.len(), 6);
    assert_eq!(ids.last().unwrap(), "2023/1T");
}

#[test]
fn test_discovery_fails_without_top_level_index() {
    let http = FakeHttp::default();
    assert!(PeriodDiscovery::new(&http, BASE).latest_periods(3).is_err());
}

#[test]
fn test_fetch_caches_and_continues_past_failures() {
    let tmp = tempdir().unwrap();
    let downloads = tmp.path().join("downloads");
    let extracted = tmp.path().join("extraidos");
    let http = FakeHttp::default().with_file(
        &format!("{}2024/1T2024.zip", BASE),
        zip_bytes(&[
            ("dados/1T2024.csv", "REG_ANS;CD_CONTA_CONTABIL;VL_SALDO_FINAL\n1;41;10,00\n"),
            ("../evil.txt", "should never be written"),
        ]),
    );
    let fetcher = ArchiveFetcher::new(&http, BASE, &downloads, &extracted);
    let identifiers = vec!["2024/1T".to_string(), "2023/4T".to_string(), "bogus".to_string()];

    let first = fetcher.fetch_and_extract(&identifiers).unwrap();
    assert_eq!(first.files, vec![extracted.join("2024_1T").join("1T2024.csv")]);
    assert_eq!(first.stats.downloads, 1);
    assert_eq!(first.stats.download_failures, 1);
    assert_eq!(first.stats.periods_failed, 1);
    assert_eq!(first.stats.entries_rejected, 1);
    assert!(downloads.join("2024_1T").join("1T2024.zip").exists());
    assert!(!extracted.join("evil.txt").exists());
    assert!(!extracted.join("2024_1T").join("evil.txt").exists());
    assert!(!tmp.path().join("evil.txt").exists());

    let second = fetcher.fetch_and_extract(&identifiers[..1]).unwrap();
    assert_eq!(second.stats.cache_hits, 1);
    assert_eq!(second.stats.downloads, 0);
    assert_eq!(http.download_count(), 1);
    assert_eq!(second.files.len(), 1);
}

#[test]
fn test_colliding_entry_names_are_consolidated_once() {
    let tmp = tempdir().unwrap();
    let body = "REG_ANS;CD_CONTA_CONTABIL;VL_SALDO_FINAL\n1;41;10,00\n";
    let http = FakeHttp::default().with_file(
        &format!("{}2024/1T2024.zip", BASE),
        zip_bytes(&[("a/1T2024.csv", body), ("b/1T2024.csv", body)]),
    );
    let fetcher = ArchiveFetcher::new(
        &http,
        BASE,
        &tmp.path().join("downloads"),
        &tmp.path().join("extraidos"),
    );

    let outcome = fetcher.fetch_and_extract(&["2024/1T".to_string()]).unwrap();
    assert_eq!(outcome.files.len(), 1);
    assert_eq!(outcome.stats.entries_extracted, 2);

    let (records, stats) = Consolidator::new("41", 2024).consolidate_files(&outcome.files);
    assert_eq!(stats.files_processed, 1);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].amount.to_string(), "10.00");
}
