use std::process;
use std::time::Duration;

use clap::Parser;

use mailprobe::batch::{self, Reconnector};
use mailprobe::cli::{multi_query, Cli, Command};
use mailprobe::error::Result;
use mailprobe::types::{parse_search_date, validate_email, Credentials, SearchQuery};
use mailprobe::Session;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    // clap's own exit code for usage errors is 2; this tool reserves 2 for
    // transport failures, so usage problems are reported and mapped to 1
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            process::exit(if e.use_stderr() { 1 } else { 0 });
        }
    };

    if let Err(e) = run(cli) {
        eprintln!("mailprobe: {}", e);
        process::exit(e.exit_code());
    }
}

fn run(cli: Cli) -> Result<()> {
    let creds = Credentials {
        host: cli.host,
        port: cli.port,
        username: cli.username,
        password: cli.password,
    };
    let timeout = Duration::from_secs(cli.timeout);
    let throttle = Duration::from_millis(cli.throttle_ms);

    match cli.command {
        Command::Check => {
            let mut session = Session::open(&creds, timeout)?;
            session.logout()?;
            println!("OK");
        }
        Command::Count => {
            let mut session = Session::open(&creds, timeout)?;
            let count = session.count()?;
            let _ = session.logout();
            println!("{}", count);
        }
        Command::Latest { count } => {
            let mut session = Session::open(&creds, timeout)?;
            let messages = session.latest(count)?;
            let _ = session.logout();
            for msg in messages {
                println!("{}\t{}\t{}\t{}", msg.seq, msg.from, msg.subject, msg.date);
            }
        }
        Command::Read { id } => {
            let mut session = Session::open(&creds, timeout)?;
            let body = session.fetch_body(id)?;
            let _ = session.logout();
            println!("{}", body);
        }
        Command::SearchSender { email } => {
            validate_email(&email)?;
            run_search(&creds, timeout, &SearchQuery::from_sender(&email))?;
        }
        Command::SearchSubject { text } => {
            run_search(&creds, timeout, &SearchQuery::from_subject(&text))?;
        }
        Command::SearchSince { date } => {
            let date = parse_search_date(&date)?;
            run_search(&creds, timeout, &SearchQuery::default().since(date))?;
        }
        Command::SearchAdvanced { criteria } => {
            run_search(&creds, timeout, &SearchQuery::raw(criteria))?;
        }
        Command::SearchMulti {
            from,
            subject,
            since,
            before,
        } => {
            let query = multi_query(&from, &subject, &since, &before)?;
            run_search(&creds, timeout, &query)?;
        }
        Command::ExtractUrl { email, pattern } => {
            let mut source = Reconnector::new(creds, timeout);
            let row = batch::extract_url_for_sender(&mut source, &email, &pattern)?;
            println!("{}", row.match_url);
        }
        Command::SearchSenderBatch { input, output } => {
            let mut source = Reconnector::new(creds, timeout);
            let summary = batch::search_sender_batch(&mut source, &input, &output, throttle)?;
            println!("{}", summary);
        }
        Command::ExtractUrlsBatch {
            input,
            output,
            pattern,
        } => {
            let mut source = Reconnector::new(creds, timeout);
            let summary =
                batch::extract_urls_batch(&mut source, &input, &output, &pattern, throttle)?;
            println!("{}", summary);
        }
        Command::ProcessResults {
            input,
            output,
            pattern,
        } => {
            let mut source = Reconnector::new(creds, timeout);
            let summary =
                batch::process_results(&mut source, &input, &output, &pattern, throttle)?;
            println!("{}", summary);
        }
    }
    Ok(())
}

fn run_search(creds: &Credentials, timeout: Duration, query: &SearchQuery) -> Result<()> {
    // render first so malformed criteria never cost a connection
    query.to_criteria()?;
    let mut session = Session::open(creds, timeout)?;
    let ids = session.search(query)?;
    let _ = session.logout();
    let rendered: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
    println!("{}", rendered.join(" "));
    Ok(())
}
