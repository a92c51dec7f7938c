mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use common::*;
use fxledger::application::{
    AccountOperationService, AppError, AuditGate, AuditGateError, ErrorCategory, HttpAuditGate,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Minimal HTTP endpoint answering every request with `status`.
/// With `status == None` it accepts connections but never answers.
async fn spawn_gate_server(status: Option<u16>) -> Result<(SocketAddr, Arc<AtomicUsize>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }

                match status {
                    Some(code) => {
                        let response = format!(
                            "HTTP/1.1 {} Test\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                            code
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    }
                    None => {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                    }
                }
            });
        }
    });

    Ok((addr, hits))
}

fn http_gate(addr: SocketAddr, timeout: Duration) -> Result<Arc<HttpAuditGate>> {
    Ok(Arc::new(HttpAuditGate::new(
        format!("http://{}/audit", addr),
        timeout,
    )?))
}

#[tokio::test]
async fn test_http_gate_success_allows_debit() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let account = funded_account(&ledger, "EUR", 10000).await?;
    let (addr, hits) = spawn_gate_server(Some(200)).await?;

    let operations =
        AccountOperationService::new(http_gate(addr, Duration::from_secs(2))?, ledger.clone());
    let entry = operations.debit_account(account, "EUR", 4000).await?;

    assert_eq!(entry.amount_cents, 6000);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(ledger.history(account, None).await?.len(), 2);

    Ok(())
}

#[tokio::test]
async fn test_http_gate_any_2xx_is_success() -> Result<()> {
    let (addr, _hits) = spawn_gate_server(Some(204)).await?;
    http_gate(addr, Duration::from_secs(2))?.check().await?;
    Ok(())
}

#[tokio::test]
async fn test_http_gate_error_status_aborts_debit() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let account = funded_account(&ledger, "EUR", 10000).await?;
    let (addr, hits) = spawn_gate_server(Some(500)).await?;

    let operations =
        AccountOperationService::new(http_gate(addr, Duration::from_secs(2))?, ledger.clone());
    let err = operations
        .debit_account(account, "EUR", 4000)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::ExternalSystemUnavailable(_)));
    assert_eq!(err.category(), ErrorCategory::ServiceUnavailable);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(ledger.get_balance(account, "EUR").await?.amount_cents, 10000);
    assert_eq!(ledger.history(account, None).await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_http_gate_client_error_status_is_failure() -> Result<()> {
    let (addr, _hits) = spawn_gate_server(Some(404)).await?;
    let result = http_gate(addr, Duration::from_secs(2))?.check().await;
    assert!(matches!(result, Err(AuditGateError::Rejected(404))));
    Ok(())
}

#[tokio::test]
async fn test_http_gate_timeout_aborts_debit() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let account = funded_account(&ledger, "EUR", 10000).await?;
    let (addr, _hits) = spawn_gate_server(None).await?;

    let gate = http_gate(addr, Duration::from_millis(300))?;
    assert!(matches!(gate.check().await, Err(AuditGateError::Timeout(_))));

    let operations = AccountOperationService::new(gate, ledger.clone());
    let err = operations
        .debit_account(account, "EUR", 4000)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ExternalSystemUnavailable(_)));
    assert_eq!(ledger.get_balance(account, "EUR").await?.amount_cents, 10000);
    assert_eq!(ledger.history(account, None).await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_http_gate_unreachable_aborts_debit() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let account = funded_account(&ledger, "EUR", 10000).await?;

    // Reserve a port, then close it so nothing is listening there
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        listener.local_addr()?
    };

    let gate = http_gate(addr, Duration::from_secs(2))?;
    assert!(gate.check().await.is_err());

    let operations = AccountOperationService::new(gate, ledger.clone());
    let err = operations
        .debit_account(account, "EUR", 4000)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ExternalSystemUnavailable(_)));
    assert_eq!(ledger.history(account, None).await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_gate_runs_before_any_debit_validation() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let gate = Arc::new(StubGate::rejecting(503));
    let operations = AccountOperationService::new(gate.clone(), ledger);

    // Neither the unknown account nor the negative amount is reached
    let err = operations.debit_account(999, "EUR", 100).await.unwrap_err();
    assert!(matches!(err, AppError::ExternalSystemUnavailable(_)));

    let err = operations.debit_account(999, "EUR", -100).await.unwrap_err();
    assert!(matches!(err, AppError::ExternalSystemUnavailable(_)));

    assert_eq!(gate.call_count(), 2);

    Ok(())
}

#[tokio::test]
async fn test_debit_errors_pass_through_an_accepting_gate() -> Result<()> {
    let (ledger, _temp) = test_ledger().await?;
    let account = funded_account(&ledger, "USD", 500).await?;
    let gate = Arc::new(StubGate::accepting());
    let operations = AccountOperationService::new(gate.clone(), ledger.clone());

    let err = operations.debit_account(account, "USD", 501).await.unwrap_err();
    assert!(matches!(err, AppError::InsufficientFunds { .. }));

    let err = operations.debit_account(999, "USD", 1).await.unwrap_err();
    assert!(matches!(err, AppError::AccountNotFound(999)));

    let entry = operations.debit_account(account, "USD", 500).await?;
    assert_eq!(entry.amount_cents, 0);
    assert_eq!(gate.call_count(), 3);

    Ok(())
}
