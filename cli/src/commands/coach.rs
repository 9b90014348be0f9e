use std::io::Write;

use futures::StreamExt;
use steward_core::coach::{CoachReply, CoachRequest, ProviderChoice, STREAM_DONE, StreamChunk};
use steward_core::sse::SseDecoder;

use crate::util::{
    EXIT_CONNECTION_ERROR, EXIT_OK, EXIT_SERVER_ERROR, EXIT_USAGE_ERROR, client,
    connection_failed, endpoint, parse_json_arg, print_error, report_failure,
};

pub struct CoachArgs {
    pub message: String,
    pub context: Option<String>,
    pub biblical: bool,
    pub provider: ProviderChoice,
    pub stream: bool,
}

pub async fn run(api_url: &str, args: CoachArgs) -> i32 {
    let request = match build_request(args) {
        Ok(request) => request,
        Err(message) => {
            print_error(
                "usage_error",
                &message,
                Some("Pass --context as a JSON object, e.g. '{\"monthlyIncome\":4200}'"),
            );
            return EXIT_USAGE_ERROR;
        }
    };

    let url = match endpoint(api_url, "/api/coach") {
        Ok(url) => url,
        Err(code) => return code,
    };

    let mut req = client().post(url).json(&request);
    if request.stream {
        req = req.header(reqwest::header::ACCEPT, "text/event-stream");
    }

    let resp = match req.send().await {
        Ok(resp) => resp,
        Err(e) => return connection_failed(&e),
    };
    if !resp.status().is_success() {
        return report_failure(resp).await;
    }

    if request.stream {
        print_stream(resp).await
    } else {
        print_reply(resp).await
    }
}

fn build_request(args: CoachArgs) -> Result<CoachRequest, String> {
    let context = args
        .context
        .as_deref()
        .map(|raw| parse_json_arg("--context", raw))
        .transpose()?;

    Ok(CoachRequest {
        message: args.message,
        context,
        biblical_mode: args.biblical,
        provider: args.provider,
        stream: args.stream,
    })
}

async fn print_reply(resp: reqwest::Response) -> i32 {
    match resp.json::<CoachReply>().await {
        Ok(reply) => {
            println!("{}", reply.reply);
            eprintln!("(provider: {})", reply.provider);
            EXIT_OK
        }
        Err(e) => {
            print_error(
                "cli_error",
                &format!("Unexpected coach response: {e}"),
                None,
            );
            EXIT_SERVER_ERROR
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum StreamStep {
    Text(String),
    Done,
    Skip,
}

fn interpret(payload: &str) -> StreamStep {
    if payload.trim() == STREAM_DONE {
        return StreamStep::Done;
    }
    match serde_json::from_str::<StreamChunk>(payload) {
        Ok(chunk) => StreamStep::Text(chunk.content),
        Err(_) => StreamStep::Skip,
    }
}

async fn print_stream(resp: reqwest::Response) -> i32 {
    let mut body = resp.bytes_stream();
    let mut decoder = SseDecoder::new();
    let mut stdout = std::io::stdout();

    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                println!();
                print_error("connection_error", &format!("Stream interrupted: {e}"), None);
                return EXIT_CONNECTION_ERROR;
            }
        };

        for payload in decoder.feed(&chunk) {
            match interpret(&payload) {
                StreamStep::Text(text) => {
                    print!("{text}");
                    let _ = stdout.flush();
                }
                StreamStep::Done => {
                    println!();
                    return EXIT_OK;
                }
                StreamStep::Skip => {}
            }
        }
    }

    println!();
    print_error(
        "connection_error",
        "Stream ended before the [DONE] marker",
        None,
    );
    EXIT_CONNECTION_ERROR
}
