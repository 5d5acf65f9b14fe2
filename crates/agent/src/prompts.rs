use careline_core::domain::patient::PatientContext;
use serde::Serialize;
use tera::{Context, Tera};
use thiserror::Error;

use crate::tools::CapabilitySchema;

const RECENT_APPOINTMENTS: usize = 5;

pub const SYSTEM_PROMPT: &str = "You are a Care Coordinator Assistant helping hospital nurses book patient appointments.

CONTEXT:
The nurse has already loaded the patient's demographics, referrals, appointment history and notes.

YOUR GOAL:
Guide the nurse to a booked appointment by collecting:
1. Provider (which doctor)
2. Location (which clinic or hospital department)
3. Date and time
4. Appointment type (NEW or ESTABLISHED), which you determine with tools

WORKFLOW:
1. Understand what the nurse needs, starting from the referrals
2. Use tools to look up providers, locations and availability
3. Present OPTIONS to the nurse instead of choosing for them
4. When a lookup returns several candidates, ask the nurse to pick one and record the choice with the matching select tool
5. Ask for anything still missing
6. Confirm every detail with the nurse, then book
7. Report the confirmation with all appointment details

TOOL USAGE RULES:
- After each tool result, present what you found to the nurse
- If a request is not possible, explain why and offer alternatives
- Do not retry failed lookups on your own; ask the nurse how to proceed
- Most bookings need 4-8 tool calls

BUSINESS RULES:
- NEW appointment: the patient has not completed a visit with the provider in the last 5 years (30 minutes long, arrive 30 minutes early)
- ESTABLISHED appointment: the patient completed a visit with the provider in the last 5 years (15 minutes long, arrive 10 minutes early)
- Use check_appointment_history to determine the type
- Appointments must fall within the location's office hours
- If the patient's insurance is not accepted, they will need to self-pay; get_self_pay_rate gives the price

TONE:
Professional, concise, proactive. Nurses are busy.

IMPORTANT:
- Never assume information; verify it with tools
- Confirm all details before the final booking";

pub const GREETING_PROMPT: &str = "Generate your initial greeting to the nurse for this patient.

Be concise and professional. Your greeting should:
1. Briefly introduce yourself as the booking assistant
2. Mention the patient's name
3. If the patient has insurance that is NOT accepted, clearly state they will need to self-pay
4. If the patient has referrals, briefly mention them (specialty and provider if available)
5. Ask what details the nurse can provide to get started";

const PATIENT_TEMPLATE: &str = "CURRENT PATIENT INFORMATION:
- Patient ID: {{ patient.id }}
- Name: {{ patient.name }}
- DOB: {{ patient.dob }}
- PCP: {{ patient.pcp }}
- EHR ID: {{ patient.ehr_id }}
{% if patient.notes %}- Notes: {{ patient.notes }}
{% endif %}{% if patient.insurance %}- Insurance: {{ patient.insurance.name }} ({% if patient.insurance.accepted %}accepted{% else %}NOT accepted, self-pay required{% endif %})
{% else %}- Insurance: none on file
{% endif %}{% if patient.referrals %}
REFERRALS:
{% for referral in patient.referrals %}- {{ referral.specialty }}: {% if referral.provider %}{{ referral.provider }}{% else %}No specific provider{% endif %}
{% endfor %}{% endif %}{% if recent %}
RECENT APPOINTMENT HISTORY ({{ appointment_count }} appointments):
{% for appointment in recent %}- {{ appointment.date }}: {{ appointment.provider }} ({{ appointment.status }})
{% endfor %}{% endif %}";

const TEXT_CALLING_TEMPLATE: &str = "CALLING TOOLS:
You cannot call tools directly. To run one, write the call on its own line exactly like
tool_name(key=\"value\", other_key=123)
and wait for its result before answering. Available tools:
{% for capability in capabilities %}- {{ capability.signature }}: {{ capability.description }}
{% endfor %}
There is no booking tool in this mode. Once provider, location, appointment type, date and time are all settled and the nurse has confirmed, say \"I'll book the appointment now\" and the booking is made for you.";

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("could not render {template} prompt: {source}")]
    Render {
        template: &'static str,
        #[source]
        source: tera::Error,
    },
}

#[derive(Serialize)]
struct AdvertisedCapability<'a> {
    signature: String,
    description: &'a str,
}

/// System instruction embedding the patient context.
///
/// `prose_capabilities` is set when calls are parsed out of text; they are then
/// described in the instruction instead of being sent as tool definitions.
pub fn system_instruction(
    patient: &PatientContext,
    prose_capabilities: Option<&[&CapabilitySchema]>,
) -> Result<String, PromptError> {
    let mut context = Context::new();
    context.insert("patient", patient);
    context.insert("recent", patient.recent_appointments(RECENT_APPOINTMENTS));
    context.insert("appointment_count", &patient.appointments.len());
    let patient_section = render("patient", PATIENT_TEMPLATE, &context)?;

    let mut instruction = format!("{SYSTEM_PROMPT}\n\n{patient_section}");

    if let Some(capabilities) = prose_capabilities {
        let advertised: Vec<AdvertisedCapability<'_>> = capabilities
            .iter()
            .map(|schema| AdvertisedCapability {
                signature: schema.signature(),
                description: schema.description,
            })
            .collect();
        let mut context = Context::new();
        context.insert("capabilities", &advertised);
        instruction.push_str("\n\n");
        instruction.push_str(&render("text calling", TEXT_CALLING_TEMPLATE, &context)?);
    }

    Ok(instruction)
}

pub fn warning_note(threshold: u32, ceiling: u32) -> String {
    format!(
        "Note: You have made {threshold} tool calls. Most tasks should complete in 4-8 calls, and your limit is {ceiling}. Keep this in mind as you continue to drive towards booking an appointment while being helpful to the nurse."
    )
}

pub const BUDGET_EXHAUSTED: &str = "I've reached the maximum number of actions for this conversation. Let me summarize what we've done so far and we can continue with a fresh start if needed.";

pub fn fallback_greeting(patient_name: &str) -> String {
    format!("Hi! I'm here to help book an appointment for {patient_name}. What details can you provide?")
}

fn render(template: &'static str, source: &str, context: &Context) -> Result<String, PromptError> {
    Tera::one_off(source, context, false).map_err(|source| PromptError::Render { template, source })
}
